#![forbid(unsafe_code)]

//! Batch update coalescing for [`Observable`](super::Observable) notifications.
//!
//! Bulk operations such as "select every cohort" flip dozens of observables
//! in a row. Without batching every flip would notify its subscribers
//! immediately, and each notification would re-run whatever depends on the
//! selection. A [`BatchScope`] defers notifications until the outermost
//! scope exits and then fires each distinct callback once, with the latest
//! value.
//!
//! # Invariants
//!
//! 1. Nested scopes are supported: only the outermost scope flushes.
//! 2. Inside a batch, `Observable::get()` returns the latest value (values
//!    change immediately, only notifications wait).
//! 3. After flush, subscribers see the final state, never an intermediate one.
//! 4. Deferred callbacks run in the order they were first enqueued.
//!
//! # Failure Modes
//!
//! - **Callback panics during flush**: remaining callbacks still run; the
//!   first panic is re-raised afterwards.

use std::cell::RefCell;
use tracing::debug_span;
use web_time::Instant;

type DeferredNotify = Box<dyn FnOnce()>;

struct DeferredEntry {
    key: Option<usize>,
    notify: DeferredNotify,
}

struct BatchContext {
    depth: u32,
    deferred: Vec<DeferredEntry>,
    /// Keyed enqueues that replaced an entry already waiting.
    coalesced: u64,
}

thread_local! {
    static BATCH_CTX: RefCell<Option<BatchContext>> = const { RefCell::new(None) };
}

/// Returns true if a batch is currently active on this thread.
pub fn is_batching() -> bool {
    BATCH_CTX.with(|ctx| ctx.borrow().is_some())
}

/// Run `f` now, or queue it for the end of the current batch.
///
/// Returns `true` if the call was deferred.
pub fn defer_or_run(f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            batch.deferred.push(DeferredEntry {
                key: None,
                notify: Box::new(f),
            });
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

/// Like [`defer_or_run`], but a second enqueue under the same `key` replaces
/// the waiting callback while keeping its queue position.
pub fn defer_or_run_keyed(key: usize, f: impl FnOnce() + 'static) -> bool {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        if let Some(ref mut batch) = *guard {
            if let Some(entry) = batch
                .deferred
                .iter_mut()
                .find(|entry| entry.key == Some(key))
            {
                entry.notify = Box::new(f);
                batch.coalesced = batch.coalesced.saturating_add(1);
            } else {
                batch.deferred.push(DeferredEntry {
                    key: Some(key),
                    notify: Box::new(f),
                });
            }
            true
        } else {
            drop(guard);
            f();
            false
        }
    })
}

fn take_deferred() -> (u64, Vec<DeferredNotify>) {
    BATCH_CTX.with(|ctx| {
        let mut guard = ctx.borrow_mut();
        match guard.as_mut() {
            Some(batch) => {
                let coalesced = std::mem::take(&mut batch.coalesced);
                let deferred = std::mem::take(&mut batch.deferred)
                    .into_iter()
                    .map(|entry| entry.notify)
                    .collect();
                (coalesced, deferred)
            }
            None => (0, Vec::new()),
        }
    })
}

/// Run deferred callbacks until none are left. Callbacks that write to
/// observables enqueue further rounds, which run before the batch ends.
fn flush() {
    let (mut coalesced, mut deferred) = take_deferred();
    if deferred.is_empty() {
        return;
    }

    let started = Instant::now();
    let _span = debug_span!(
        "reactive.batch_flush",
        callbacks = tracing::field::Empty,
        coalesced = tracing::field::Empty,
        rounds = tracing::field::Empty,
        duration_us = tracing::field::Empty
    )
    .entered();

    let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
    let mut callbacks = 0u64;
    let mut coalesced_total = 0u64;
    let mut rounds = 0u64;
    while !deferred.is_empty() {
        rounds += 1;
        callbacks += deferred.len() as u64;
        coalesced_total += coalesced;
        for notify in deferred {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(notify));
            if let Err(payload) = result
                && first_panic.is_none()
            {
                first_panic = Some(payload);
            }
        }
        (coalesced, deferred) = take_deferred();
    }

    tracing::Span::current()
        .record("callbacks", callbacks)
        .record("coalesced", coalesced_total)
        .record("rounds", rounds)
        .record("duration_us", started.elapsed().as_micros() as u64);

    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// RAII guard that begins a batch scope.
///
/// While a `BatchScope` is alive, all observable notifications on this
/// thread are deferred. When the outermost scope drops they fire.
pub struct BatchScope {
    is_root: bool,
}

impl BatchScope {
    /// Begin a new batch scope, or nest inside the active one.
    #[must_use]
    pub fn new() -> Self {
        let is_root = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match *guard {
                Some(ref mut batch) => {
                    batch.depth += 1;
                    false
                }
                None => {
                    *guard = Some(BatchContext {
                        depth: 1,
                        deferred: Vec::new(),
                        coalesced: 0,
                    });
                    true
                }
            }
        });
        Self { is_root }
    }

    /// Number of deferred notifications queued in the current batch.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        BATCH_CTX.with(|ctx| ctx.borrow().as_ref().map_or(0, |b| b.deferred.len()))
    }
}

impl Default for BatchScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BatchScope {
    fn drop(&mut self) {
        let should_flush = BATCH_CTX.with(|ctx| {
            let mut guard = ctx.borrow_mut();
            match guard.as_mut() {
                Some(batch) => {
                    batch.depth -= 1;
                    batch.depth == 0
                }
                None => false,
            }
        });

        if should_flush {
            // Clear the context even if a callback panics during flush.
            struct ClearOnExit;
            impl Drop for ClearOnExit {
                fn drop(&mut self) {
                    BATCH_CTX.with(|ctx| *ctx.borrow_mut() = None);
                }
            }
            let _clear = ClearOnExit;
            flush();
        }
    }
}

impl std::fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScope")
            .field("is_root", &self.is_root)
            .field("pending", &self.pending_count())
            .finish()
    }
}
