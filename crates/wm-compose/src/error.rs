#![forbid(unsafe_code)]

//! Error taxonomy for the composer.
//!
//! Validation problems and domain errors reported by the server are not
//! Rust errors here: they arrive as envelopes and are surfaced through
//! [`Notices`](crate::envelope::Notices). The types below cover what the
//! client itself can get wrong or fail to do.

use thiserror::Error;

use crate::entity::Family;

/// A request could not be completed or its response could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },

    #[error("invalid timezone offset '{0}', expected ±HH:MM")]
    InvalidOffset(String),

    #[error("date picker has not finished initializing")]
    PickerNotReady,

    #[error("no {family} with id '{id}'")]
    UnknownEntity { family: Family, id: String },

    #[error("{family} '{id}' has no configuration to save")]
    NotAMetric { family: Family, id: String },

    /// A submission or save was refused before any request was issued.
    #[error("{0}")]
    Incomplete(String),
}

pub type ComposeResult<T> = Result<T, ComposeError>;
