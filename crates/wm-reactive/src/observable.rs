#![forbid(unsafe_code)]

//! Observable value wrapper with change notification, version tracking and
//! write-origin tagging.
//!
//! # Design
//!
//! [`Observable<T>`] wraps a value of type `T` in shared, reference-counted
//! storage (`Rc<RefCell<..>>`). When the value changes (determined by
//! `PartialEq`), all live subscribers are notified in registration order.
//!
//! Every write carries a [`WriteOrigin`]. Ordinary writes through
//! [`Observable::set`] are [`WriteOrigin::External`]; writes made by a
//! synchronizer on behalf of another value go through
//! [`Observable::set_internal`] and are tagged [`WriteOrigin::Internal`].
//! Subscribers registered with [`Observable::subscribe_tagged`] see the tag
//! and can refuse to propagate internal writes, which is how two-way
//! synchronizers break feedback loops without a shared "paused" flag.
//!
//! # Failure Modes
//!
//! - **Subscriber leak**: If `Subscription` guards are stored indefinitely
//!   without being dropped, callbacks accumulate. Dead weak references are
//!   cleaned lazily during `notify()`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::debug_span;
use web_time::Instant;

/// Who performed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOrigin {
    /// A user edit, a server push, or any other outside actor.
    External,
    /// A synchronizer mirroring another value. Propagation that would echo
    /// the write back to its source should skip these.
    Internal,
}

impl WriteOrigin {
    /// `true` for [`WriteOrigin::Internal`].
    #[must_use]
    pub const fn is_internal(self) -> bool {
        matches!(self, Self::Internal)
    }
}

type CallbackRc<T> = Rc<dyn Fn(&T, WriteOrigin)>;
type CallbackWeak<T> = Weak<dyn Fn(&T, WriteOrigin)>;

struct ObservableInner<T> {
    value: T,
    version: u64,
    /// Subscribers stored as weak references. Dead entries are pruned on notify.
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared, version-tracked value with change notification.
///
/// Cloning an `Observable` creates a new handle to the **same** inner state:
/// both handles see the same value and share subscribers.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing write.
/// 2. A write of a value equal to the current one is a no-op, whatever
///    its origin.
/// 3. Subscribers are notified in registration order.
/// 4. Dead subscribers (dropped [`Subscription`] guards) are pruned lazily.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}

impl<T: Default + Clone + PartialEq + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable with the given initial value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Write a new value as an outside actor.
    ///
    /// Safe to call re-entrantly from within subscriber callbacks.
    pub fn set(&self, value: T) {
        self.write(value, WriteOrigin::External);
    }

    /// Write a new value on behalf of a synchronizer. Tagged subscribers see
    /// [`WriteOrigin::Internal`] for exactly this write.
    pub fn set_internal(&self, value: T) {
        self.write(value, WriteOrigin::Internal);
    }

    /// Write with an explicit origin.
    pub fn write(&self, value: T, origin: WriteOrigin) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
        }
        self.notify(origin);
    }

    /// Modify the value in place. Notifies (as an external write) only when
    /// the value actually changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            let old = inner.value.clone();
            f(&mut inner.value);
            if inner.value != old {
                inner.version += 1;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify(WriteOrigin::External);
        }
    }

    /// Subscribe to value changes regardless of origin.
    ///
    /// Dropping the returned guard unsubscribes the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_tagged(move |value, _origin| callback(value))
    }

    /// Subscribe to value changes together with the origin of each write.
    pub fn subscribe_tagged(&self, callback: impl Fn(&T, WriteOrigin) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        let weak = Rc::downgrade(&strong);
        self.inner.borrow_mut().subscribers.push(weak);
        // `Rc<dyn Fn>` cannot coerce to `dyn Any` directly, so box the Rc.
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of registered subscribers, including dead ones not yet pruned.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Number of subscribers whose guard is still alive.
    #[must_use]
    pub fn live_subscriber_count(&self) -> usize {
        self.inner
            .borrow()
            .subscribers
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Returns `true` when both handles share the same storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Notify live subscribers and prune dead ones.
    ///
    /// If a batch scope is active (see [`super::batch::BatchScope`]),
    /// notifications are deferred until the batch exits.
    fn notify(&self, origin: WriteOrigin) {
        // Collect first so no borrow is held while callbacks run.
        let callbacks: Vec<CallbackRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner
                .subscribers
                .iter()
                .filter_map(|w| w.upgrade())
                .collect()
        };

        if callbacks.is_empty() {
            return;
        }

        if super::batch::is_batching() {
            for cb in callbacks {
                let callback_key = Rc::as_ptr(&cb) as *const () as usize;
                let source = self.clone();
                super::batch::defer_or_run_keyed(callback_key, move || {
                    let latest = source.get();
                    cb(&latest, origin);
                });
            }
            return;
        }

        let value = self.inner.borrow().value.clone();
        let subscribers = callbacks.len() as u64;
        let started = Instant::now();
        let _span = debug_span!(
            "reactive.propagate",
            subscribers,
            internal = origin.is_internal(),
            duration_us = tracing::field::Empty
        )
        .entered();

        for cb in &callbacks {
            cb(&value, origin);
        }

        tracing::Span::current().record("duration_us", started.elapsed().as_micros() as u64);
    }
}

/// RAII guard for a subscriber callback.
///
/// Dropping the `Subscription` makes the callback unreachable: the strong
/// `Rc` goes away and the observable's `Weak` fails to upgrade.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl Subscription {
    /// Release the subscription now. Equivalent to dropping it; consuming
    /// `self` makes a second release unrepresentable.
    pub fn dispose(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};

    #[derive(Default)]
    struct PropagateVisitor {
        subscribers: Option<u64>,
    }

    impl Visit for PropagateVisitor {
        fn record_u64(&mut self, field: &Field, value: u64) {
            if field.name() == "subscribers" {
                self.subscribers = Some(value);
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    struct PropagateSpanSubscriber {
        next_id: AtomicU64,
        spans: Arc<Mutex<Vec<u64>>>,
    }

    impl tracing::Subscriber for PropagateSpanSubscriber {
        fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, attrs: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            if attrs.metadata().name() == "reactive.propagate" {
                let mut visitor = PropagateVisitor::default();
                attrs.record(&mut visitor);
                self.spans
                    .lock()
                    .expect("span capture lock")
                    .push(visitor.subscribers.unwrap_or(0));
            }
            tracing::span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}

        fn event(&self, _event: &tracing::Event<'_>) {}

        fn enter(&self, _span: &tracing::span::Id) {}

        fn exit(&self, _span: &tracing::span::Id) {}
    }

    fn capture_propagate_spans(run: impl FnOnce()) -> Vec<u64> {
        let spans = Arc::new(Mutex::new(Vec::new()));
        let subscriber = PropagateSpanSubscriber {
            next_id: AtomicU64::new(1),
            spans: Arc::clone(&spans),
        };
        let _guard = tracing::subscriber::set_default(subscriber);
        run();
        spans.lock().expect("span capture lock").clone()
    }

    #[test]
    fn get_set_basic() {
        let obs = Observable::new(42);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.version(), 0);

        obs.set(99);
        assert_eq!(obs.get(), 99);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn same_value_is_a_no_op_for_both_origins() {
        let obs = Observable::new("2024-01-01".to_string());
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = obs.subscribe(move |_| h.set(h.get() + 1));

        obs.set("2024-01-01".to_string());
        obs.set_internal("2024-01-01".to_string());
        assert_eq!(obs.version(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn update_mutates_in_place() {
        let obs = Observable::new(vec![1, 2, 3]);
        obs.update(|v| v.push(4));
        assert_eq!(obs.get(), vec![1, 2, 3, 4]);
        assert_eq!(obs.version(), 1);

        obs.update(|v| v[0] = 1);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn tagged_subscriber_sees_origin() {
        let obs = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe_tagged(move |v, origin| s.borrow_mut().push((*v, origin)));

        obs.set(1);
        obs.set_internal(2);
        obs.write(3, WriteOrigin::External);

        assert_eq!(
            *seen.borrow(),
            vec![
                (1, WriteOrigin::External),
                (2, WriteOrigin::Internal),
                (3, WriteOrigin::External),
            ]
        );
    }

    #[test]
    fn plain_subscriber_sees_internal_writes_too() {
        let obs = Observable::new(0);
        let last = Rc::new(Cell::new(0));
        let l = Rc::clone(&last);
        let _sub = obs.subscribe(move |v| l.set(*v));

        obs.set_internal(7);
        assert_eq!(last.get(), 7);
    }

    #[test]
    fn subscription_drop_unsubscribes() {
        let obs = Observable::new(0);
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);

        let sub = obs.subscribe(move |_| c.set(c.get() + 1));
        obs.set(1);
        assert_eq!(count.get(), 1);

        sub.dispose();
        obs.set(2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn live_count_excludes_dropped_guards_before_prune() {
        let obs = Observable::new(0);
        let _s1 = obs.subscribe(|_| {});
        let s2 = obs.subscribe(|_| {});
        assert_eq!(obs.live_subscriber_count(), 2);

        drop(s2);
        assert_eq!(obs.subscriber_count(), 2);
        assert_eq!(obs.live_subscriber_count(), 1);

        obs.set(1);
        assert_eq!(obs.subscriber_count(), 1);
    }

    #[test]
    fn clone_shares_state_and_subscribers() {
        let a = Observable::new(0);
        let b = a.clone();
        assert!(a.ptr_eq(&b));

        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let _sub = a.subscribe(move |_| c.set(c.get() + 1));

        b.set(5);
        assert_eq!(a.get(), 5);
        assert_eq!(count.get(), 1);
        assert!(!a.ptr_eq(&Observable::new(5)));
    }

    #[test]
    fn notification_order_is_registration_order() {
        let obs = Observable::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let _s1 = obs.subscribe(move |_| l1.borrow_mut().push('A'));
        let l2 = Rc::clone(&log);
        let _s2 = obs.subscribe(move |_| l2.borrow_mut().push('B'));
        let l3 = Rc::clone(&log);
        let _s3 = obs.subscribe(move |_| l3.borrow_mut().push('C'));

        obs.set(1);
        assert_eq!(*log.borrow(), vec!['A', 'B', 'C']);
    }

    #[test]
    fn reentrant_write_from_subscriber() {
        let source = Observable::new(0);
        let mirror = Observable::new(0);
        let m = mirror.clone();
        let _sub = source.subscribe(move |v| m.set_internal(*v * 10));

        source.set(4);
        assert_eq!(mirror.get(), 40);
    }

    #[test]
    fn batch_defers_and_keeps_last_origin() {
        let obs = Observable::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let _sub = obs.subscribe_tagged(move |v, origin| s.borrow_mut().push((*v, origin)));

        {
            let _batch = crate::batch::BatchScope::new();
            obs.set(1);
            obs.set_internal(2);
            assert!(seen.borrow().is_empty());
        }

        assert_eq!(*seen.borrow(), vec![(2, WriteOrigin::Internal)]);
    }

    #[test]
    fn unobserved_writes_emit_no_propagation_span() {
        let obs = Observable::new(0);
        let spans = capture_propagate_spans(|| obs.set(1));
        assert!(spans.is_empty());
    }

    #[test]
    fn propagation_span_reports_subscriber_count() {
        let obs = Observable::new(0);
        let _a = obs.subscribe(|_| {});
        let _b = obs.subscribe(|_| {});

        let spans = capture_propagate_spans(|| obs.set(1));
        assert_eq!(spans, vec![2]);
    }

    #[test]
    fn debug_format() {
        let obs = Observable::new(42);
        let dbg = format!("{obs:?}");
        assert!(dbg.contains("Observable"));
        assert!(dbg.contains("42"));
        assert!(dbg.contains("version"));
    }
}
