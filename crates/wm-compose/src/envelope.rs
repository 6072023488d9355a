#![forbid(unsafe_code)]

//! Response envelopes and the user-visible message sink.
//!
//! The server wraps domain errors and navigation requests in a JSON
//! envelope (`{isError, message}` / `{isRedirect, redirectTo}`). Anything
//! else is a normal payload.

use std::rc::Rc;

use serde_json::Value;
use wm_reactive::Observable;

use crate::error::TransportError;

/// How a response should be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Payload(Value),
    Error(String),
    Redirect(String),
}

impl Envelope {
    #[must_use]
    pub fn classify(response: Value) -> Self {
        let flag = |key: &str| response.get(key).and_then(Value::as_bool).unwrap_or(false);
        let text = |key: &str| {
            response
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        if flag("isError") {
            Self::Error(text("message"))
        } else if flag("isRedirect") {
            Self::Redirect(text("redirectTo"))
        } else {
            Self::Payload(response)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Warning,
    Info,
    Success,
}

impl NoticeLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Success => "success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// Survives [`Notices::clear`].
    pub permanent: bool,
}

/// Messages shown to the user, plus navigation requests.
///
/// Showing a message clears every non-permanent one first.
#[derive(Clone)]
pub struct Notices {
    shown: Observable<Vec<Notice>>,
    redirect: Observable<Option<String>>,
    failure_message: Rc<str>,
}

impl Notices {
    #[must_use]
    pub fn new(failure_message: &str) -> Self {
        Self {
            shown: Observable::new(Vec::new()),
            redirect: Observable::new(None),
            failure_message: Rc::from(failure_message),
        }
    }

    pub fn show(&self, level: NoticeLevel, message: impl Into<String>, permanent: bool) {
        let notice = Notice {
            level,
            message: message.into(),
            permanent,
        };
        match level {
            NoticeLevel::Error => tracing::warn!(message = %notice.message, "error shown"),
            _ => tracing::debug!(level = level.as_str(), message = %notice.message, "notice shown"),
        }
        self.shown.update(|shown| {
            shown.retain(|n| n.permanent);
            shown.push(notice);
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(NoticeLevel::Error, message, false);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.show(NoticeLevel::Warning, message, false);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.show(NoticeLevel::Info, message, false);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.show(NoticeLevel::Success, message, false);
    }

    /// Remove every non-permanent notice.
    pub fn clear(&self) {
        self.shown.update(|shown| shown.retain(|n| n.permanent));
    }

    /// Report a transport failure with the generic message.
    pub fn failure(&self, err: &TransportError) {
        tracing::error!(%err, "request failed");
        self.error(self.failure_message.to_string());
    }

    /// The most recent notice.
    #[must_use]
    pub fn current(&self) -> Option<Notice> {
        self.shown.with(|shown| shown.last().cloned())
    }

    #[must_use]
    pub fn shown(&self) -> &Observable<Vec<Notice>> {
        &self.shown
    }

    /// Last navigation target requested by the server.
    #[must_use]
    pub fn redirect(&self) -> &Observable<Option<String>> {
        &self.redirect
    }

    /// Route a completed request. Returns the payload only for a normal
    /// response; errors, redirects and transport failures are surfaced here
    /// and end the flow.
    pub fn handle(&self, result: Result<Value, TransportError>) -> Option<Value> {
        match result {
            Err(err) => {
                self.failure(&err);
                None
            }
            Ok(response) => match Envelope::classify(response) {
                Envelope::Error(message) => {
                    self.error(message);
                    None
                }
                Envelope::Redirect(target) => {
                    tracing::info!(target_url = %target, "redirect requested");
                    self.redirect.set(Some(target));
                    None
                }
                Envelope::Payload(payload) => {
                    self.clear();
                    Some(payload)
                }
            },
        }
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FAILURE_MESSAGE)
    }
}

impl std::fmt::Debug for Notices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notices")
            .field("current", &self.current())
            .field("redirect", &self.redirect.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_envelopes() {
        assert_eq!(
            Envelope::classify(json!({"isError": true, "message": "no such cohort"})),
            Envelope::Error("no such cohort".into())
        );
        assert_eq!(
            Envelope::classify(json!({"isRedirect": true, "redirectTo": "/reports/"})),
            Envelope::Redirect("/reports/".into())
        );
        let payload = json!({"cohorts": []});
        assert_eq!(Envelope::classify(payload.clone()), Envelope::Payload(payload));
        assert!(matches!(
            Envelope::classify(json!({"isError": false, "message": "fine"})),
            Envelope::Payload(_)
        ));
        assert!(matches!(Envelope::classify(json!("<form></form>")), Envelope::Payload(_)));
    }

    #[test]
    fn handle_routes_each_kind() {
        let notices = Notices::default();

        assert_eq!(notices.handle(Ok(json!({"isError": true, "message": "bad"}))), None);
        assert_eq!(notices.current().map(|n| n.level), Some(NoticeLevel::Error));

        assert_eq!(notices.handle(Ok(json!({"ok": 1}))), Some(json!({"ok": 1})));
        assert_eq!(notices.current(), None, "normal responses clear messages");

        assert_eq!(notices.handle(Ok(json!({"isRedirect": true, "redirectTo": "/x"}))), None);
        assert_eq!(notices.redirect().get().as_deref(), Some("/x"));

        assert_eq!(notices.handle(Err(TransportError::Status(500))), None);
        assert_eq!(
            notices.current().map(|n| n.message),
            Some(crate::config::DEFAULT_FAILURE_MESSAGE.to_string())
        );
    }

    #[test]
    fn permanent_notices_survive() {
        let notices = Notices::new("down");
        notices.show(NoticeLevel::Info, "maintenance tonight", true);
        notices.warning("first");
        notices.warning("second");
        let shown = notices.shown().get();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].message, "maintenance tonight");
        assert_eq!(shown[1].message, "second");

        notices.clear();
        assert_eq!(notices.shown().get().len(), 1);
    }
}
