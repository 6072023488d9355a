#![forbid(unsafe_code)]

//! Report composition engine.
//!
//! Users pick any subset of cohorts and metrics; every selected metric
//! carries a server-rendered configuration fragment whose fields become live
//! state, and the cross product of the two selections is the report request.
//!
//! # Key Components
//!
//! - [`ReportBuilder`] - application state, constructed once per page
//! - [`SelectionStore`] - the two collections and the fetches selection triggers
//! - [`RequestMatrix`] - debounced cross product of selections into [`ResponseSlot`]s
//! - [`FormContainer`] - binds fetched markup into a [`FieldMap`] of live fields
//! - [`DateSync`] - two-way sync between a zoned and a local timestamp
//! - [`Notices`] - envelope handling and user-visible messages
//! - [`Transport`] - boundary to the HTTP endpoints
//!
//! # How it fits
//! Everything reactive is built on `wm-reactive`. Nothing here blocks:
//! network completions and debounced rebuilds run when the host drains the
//! shared [`TaskQueue`](wm_reactive::TaskQueue).

pub mod app;
pub mod config;
pub mod confirm;
pub mod datesync;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod form;
pub mod markup;
pub mod matrix;
pub mod selection;
pub mod timezone;
pub mod transport;

pub use app::ReportBuilder;
pub use config::{ComposeConfig, ConfigError, MarkupConfig};
pub use confirm::{Phrasing, Prompt, confirm_danger, guard};
pub use datesync::{DatePicker, DateSync};
pub use entity::{AggregationOptions, EntityId, EntityRecord, EntityRef, Family, LoadState};
pub use envelope::{Envelope, Notice, NoticeLevel, Notices};
pub use error::{ComposeError, ComposeResult, TransportError};
pub use form::{DefaultSource, Defaults, FieldMap, FormContainer, LiveField, LiveValue};
pub use matrix::{RequestMatrix, ResponseSlot, SlotRef};
pub use selection::SelectionStore;
pub use timezone::{Timezone, available_timezones};
pub use transport::{Completion, RecordingTransport, Request, Transport};
