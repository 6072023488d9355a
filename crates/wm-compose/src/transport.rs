#![forbid(unsafe_code)]

//! Boundary to the HTTP endpoints.
//!
//! The composer never blocks on the network: [`Transport::send`] returns
//! immediately and the completion is invoked later, in whatever order
//! responses arrive.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value, json};

use crate::entity::{EntityId, Family};
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Every call the composer makes.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ListEntities(Family),
    EntityDetail {
        family: Family,
        id: EntityId,
    },
    ConfigurationFragment {
        metric_name: String,
    },
    SaveConfiguration {
        metric_id: EntityId,
        metric_name: String,
        fields: Map<String, Value>,
    },
    Submit {
        responses: Value,
    },
}

impl Request {
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::ListEntities(_)
            | Self::EntityDetail { .. }
            | Self::ConfigurationFragment { .. } => Method::Get,
            Self::SaveConfiguration { .. } | Self::Submit { .. } => Method::Post,
        }
    }

    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::ListEntities(family) => format!("/{}/list/", family.plural()),
            Self::EntityDetail { family, id } => format!("/{}/detail/{id}", family.plural()),
            Self::ConfigurationFragment { metric_name }
            | Self::SaveConfiguration { metric_name, .. } => {
                format!("/metrics/configure/{metric_name}")
            }
            Self::Submit { .. } => "/reports/create/".to_string(),
        }
    }

    /// Form body of a POST.
    #[must_use]
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::SaveConfiguration { fields, .. } => Some(Value::Object(fields.clone())),
            Self::Submit { responses } => Some(json!({ "responses": responses.to_string() })),
            _ => None,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = match self.method() {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        write!(f, "{method} {}", self.path())
    }
}

/// Invoked once with the decoded response body.
pub type Completion = Box<dyn FnOnce(Result<Value, TransportError>)>;

pub trait Transport {
    /// Issue `request`. Must not call `complete` before returning.
    fn send(&self, request: Request, complete: Completion);
}

struct PendingCall {
    id: usize,
    request: Request,
    complete: Completion,
}

#[derive(Default)]
struct RecordingInner {
    sent: Vec<Request>,
    pending: Vec<PendingCall>,
    next_id: usize,
}

/// In-memory transport that records requests and completes them when told.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Rc<RefCell<RecordingInner>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.inner.borrow().sent.clone()
    }

    /// How many sent requests match `predicate`.
    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.inner.borrow().sent.iter().filter(|r| predicate(r)).count()
    }

    /// Requests still waiting for a response, with their call ids.
    #[must_use]
    pub fn pending(&self) -> Vec<(usize, Request)> {
        self.inner
            .borrow()
            .pending
            .iter()
            .map(|call| (call.id, call.request.clone()))
            .collect()
    }

    /// Complete call `id`. Returns `false` if it is not pending.
    pub fn respond(&self, id: usize, result: Result<Value, TransportError>) -> bool {
        let call = {
            let mut inner = self.inner.borrow_mut();
            let Some(index) = inner.pending.iter().position(|call| call.id == id) else {
                return false;
            };
            inner.pending.remove(index)
        };
        (call.complete)(result);
        true
    }

    /// Complete the oldest pending request matching `predicate`.
    pub fn respond_to(
        &self,
        predicate: impl Fn(&Request) -> bool,
        result: Result<Value, TransportError>,
    ) -> bool {
        let id = self
            .inner
            .borrow()
            .pending
            .iter()
            .find(|call| predicate(&call.request))
            .map(|call| call.id);
        id.is_some_and(|id| self.respond(id, result))
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: Request, complete: Completion) {
        tracing::debug!(request = %request, "request recorded");
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.sent.push(request.clone());
        inner.pending.push(PendingCall {
            id,
            request,
            complete,
        });
    }
}

impl fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("RecordingTransport")
            .field("sent", &inner.sent.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}
