#![forbid(unsafe_code)]

//! Bidirectional sync between a zoned timestamp and a locally edited one.
//!
//! A date field shows the user a naive local timestamp ("2024-01-01 10:00:00")
//! while the form submits an absolute one. [`DateSync`] keeps the two in
//! step relative to a timezone offset observable:
//!
//! - **Local → Zoned** runs when the local value or the offset changes.
//!   The local digits are read as if they were at the offset and the instant
//!   is written to the zoned value, normalized to UTC. Changing only the
//!   offset therefore keeps the displayed digits and moves the instant.
//!   An empty local value empties the zoned value; a missing offset leaves
//!   the zoned value alone until one is chosen.
//! - **Zoned → Local** runs when someone outside writes the zoned value.
//!   The local value is recomputed and written as an internal write, which
//!   the Local → Zoned listener ignores, so the pair never loops.
//!
//! The date-picker widget may still be initializing when a zoned push
//! arrives. Such pushes are dropped; [`DateSync::initialize`] re-applies
//! the correct value on the next render pass.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Duration, NaiveDateTime};
use wm_reactive::{BindingScope, Observable, WriteOrigin};

use crate::error::{ComposeError, ComposeResult};
use crate::timezone::parse_offset;

/// Headless state of a date-picker widget.
#[derive(Clone, Default)]
pub struct DatePicker {
    inner: Rc<PickerInner>,
}

#[derive(Default)]
struct PickerInner {
    initialized: Cell<bool>,
    shown: RefCell<String>,
}

impl DatePicker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A picker that is usable right away.
    #[must_use]
    pub fn initialized() -> Self {
        let picker = Self::new();
        picker.inner.initialized.set(true);
        picker
    }

    pub fn mark_initialized(&self) {
        self.inner.initialized.set(true);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get()
    }

    /// Display `local` in the widget.
    pub fn set_date(&self, local: &str) -> ComposeResult<()> {
        if !self.is_initialized() {
            return Err(ComposeError::PickerNotReady);
        }
        *self.inner.shown.borrow_mut() = local.to_string();
        Ok(())
    }

    /// What the widget currently displays.
    #[must_use]
    pub fn shown(&self) -> String {
        self.inner.shown.borrow().clone()
    }
}

impl std::fmt::Debug for DatePicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatePicker")
            .field("initialized", &self.is_initialized())
            .field("shown", &*self.inner.shown.borrow())
            .finish()
    }
}

#[derive(Clone)]
struct Endpoints {
    zoned: Observable<String>,
    local: Observable<String>,
    offset: Observable<String>,
    picker: DatePicker,
    format: Rc<str>,
}

impl Endpoints {
    fn local_to_zoned(&self) {
        let local = self.local.get();
        if local.trim().is_empty() {
            self.zoned.set_internal(String::new());
            return;
        }
        let offset = self.offset.get();
        if offset.trim().is_empty() {
            tracing::trace!(local = %local, "no timezone selected yet; zoned value unchanged");
            return;
        }
        match local_to_zoned(&local, &offset, &self.format) {
            Ok(zoned) => self.zoned.set_internal(zoned),
            Err(err) => {
                tracing::warn!(local = %local, offset = %offset, %err, "local date not converted");
            }
        }
    }

    fn zoned_to_local(&self) {
        let offset = self.offset.get();
        if offset.trim().is_empty() {
            return;
        }
        let zoned = self.zoned.get();
        let local = if zoned.trim().is_empty() {
            String::new()
        } else {
            match zoned_to_local(&zoned, &offset, &self.format) {
                Ok(local) => local,
                Err(err) => {
                    tracing::warn!(
                        zoned = %zoned,
                        offset = %offset,
                        %err,
                        "zoned date not converted"
                    );
                    return;
                }
            }
        };

        if let Err(err) = self.picker.set_date(&local) {
            tracing::debug!(zoned = %zoned, %err, "zoned push discarded before widget init");
            return;
        }
        self.local.set_internal(local);
    }
}

struct SyncInner {
    endpoints: Endpoints,
    scope: RefCell<BindingScope>,
}

/// A live date binding. Clones share the same state.
#[derive(Clone)]
pub struct DateSync {
    inner: Rc<SyncInner>,
}

impl DateSync {
    /// Create a binding driven by `offset` (`±HH:MM`, empty for "unset").
    #[must_use]
    pub fn new(offset: Observable<String>, format: &str) -> Self {
        Self::with_picker(offset, format, DatePicker::initialized())
    }

    /// Create a binding whose widget may not be initialized yet.
    #[must_use]
    pub fn with_picker(offset: Observable<String>, format: &str, picker: DatePicker) -> Self {
        let endpoints = Endpoints {
            zoned: Observable::new(String::new()),
            local: Observable::new(String::new()),
            offset,
            picker,
            format: Rc::from(format),
        };

        let mut scope = BindingScope::new();

        let e = endpoints.clone();
        scope.subscribe_tagged(&endpoints.local, move |_, origin| {
            if origin == WriteOrigin::External {
                e.local_to_zoned();
            }
        });

        let e = endpoints.clone();
        scope.subscribe(&endpoints.offset, move |_| e.local_to_zoned());

        let e = endpoints.clone();
        scope.subscribe_tagged(&endpoints.zoned, move |_, origin| {
            if origin == WriteOrigin::External {
                e.zoned_to_local();
            }
        });

        Self {
            inner: Rc::new(SyncInner {
                endpoints,
                scope: RefCell::new(scope),
            }),
        }
    }

    /// The absolute timestamp, UTC, in the configured format. Writing it
    /// from outside recomputes the local value.
    #[must_use]
    pub fn zoned(&self) -> &Observable<String> {
        &self.inner.endpoints.zoned
    }

    /// The naive timestamp the user edits.
    #[must_use]
    pub fn local(&self) -> &Observable<String> {
        &self.inner.endpoints.local
    }

    #[must_use]
    pub fn offset(&self) -> &Observable<String> {
        &self.inner.endpoints.offset
    }

    #[must_use]
    pub fn picker(&self) -> &DatePicker {
        &self.inner.endpoints.picker
    }

    /// A user edit of the local value, as the picker reports it.
    pub fn edit_local(&self, value: impl Into<String>) {
        let value = value.into();
        let _ = self.inner.endpoints.picker.set_date(&value);
        self.inner.endpoints.local.set(value);
    }

    /// An outside actor pushes an absolute timestamp.
    pub fn push_zoned(&self, value: impl Into<String>) {
        self.inner.endpoints.zoned.set(value.into());
    }

    /// Run Zoned → Local against the current zoned value.
    pub fn resync_local(&self) {
        self.inner.endpoints.zoned_to_local();
    }

    /// Render pass: mark the widget ready and show the correct value.
    pub fn initialize(&self) {
        let endpoints = &self.inner.endpoints;
        endpoints.picker.mark_initialized();
        if !endpoints.zoned.get().is_empty() && !endpoints.offset.get().trim().is_empty() {
            endpoints.zoned_to_local();
        } else {
            let _ = endpoints.picker.set_date(&endpoints.local.get());
        }
    }

    /// Release the three internal subscriptions. Idempotent.
    pub fn dispose(&self) {
        self.inner.scope.borrow_mut().clear();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.scope.borrow().is_empty()
    }

    /// Internal subscriptions still held (3 while live, 0 once disposed).
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.inner.scope.borrow().binding_count()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DateSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let e = &self.inner.endpoints;
        f.debug_struct("DateSync")
            .field("zoned", &e.zoned.get())
            .field("local", &e.local.get())
            .field("offset", &e.offset.get())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn parse_naive(value: &str, format: &str) -> ComposeResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), format).map_err(|e| ComposeError::InvalidDate {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Read `local` as wall-clock time at `offset` and return the instant in
/// UTC, formatted with `format`.
pub fn local_to_zoned(local: &str, offset: &str, format: &str) -> ComposeResult<String> {
    let naive = parse_naive(local, format)?;
    let offset = parse_offset(offset)?;
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
    let utc = naive
        .checked_sub_signed(shift)
        .ok_or_else(|| out_of_range(local))?;
    Ok(utc.format(format).to_string())
}

/// Inverse of [`local_to_zoned`]. `zoned` is read as UTC when it carries no
/// offset of its own; RFC 3339 and `<format> ±HH:MM` are also accepted.
pub fn zoned_to_local(zoned: &str, offset: &str, format: &str) -> ComposeResult<String> {
    let utc = parse_zoned(zoned, format)?;
    let offset = parse_offset(offset)?;
    let shift = Duration::seconds(i64::from(offset.local_minus_utc()));
    let local = utc
        .checked_add_signed(shift)
        .ok_or_else(|| out_of_range(zoned))?;
    Ok(local.format(format).to_string())
}

fn out_of_range(value: &str) -> ComposeError {
    ComposeError::InvalidDate {
        value: value.to_string(),
        reason: "shifting by the offset leaves the supported date range".to_string(),
    }
}

fn parse_zoned(zoned: &str, format: &str) -> ComposeResult<NaiveDateTime> {
    let trimmed = zoned.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
        return Ok(naive);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.naive_utc());
    }
    let with_offset = format!("{format} %:z");
    DateTime::parse_from_str(trimmed, &with_offset)
        .map(|instant| instant.naive_utc())
        .map_err(|e| ComposeError::InvalidDate {
            value: zoned.to_string(),
            reason: e.to_string(),
        })
}
