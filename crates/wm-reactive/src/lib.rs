#![forbid(unsafe_code)]

//! Reactive substrate for the report composer.
//!
//! # Key Components
//!
//! - [`Observable`] - shared value with change notification and write-origin tags
//! - [`BatchScope`] - defers and coalesces notifications during bulk updates
//! - [`BindingScope`] - owns a group of subscriptions and releases them together
//! - [`TaskQueue`] - single-threaded FIFO with keyed coalescing
//!
//! Nothing here is `Send`: the composer runs on one UI thread and hands work
//! to later ticks through the [`TaskQueue`].

pub mod batch;
pub mod observable;
pub mod queue;
pub mod scope;

pub use batch::BatchScope;
pub use observable::{Observable, Subscription, WriteOrigin};
pub use queue::TaskQueue;
pub use scope::BindingScope;
