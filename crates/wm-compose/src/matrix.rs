#![forbid(unsafe_code)]

//! Cross product of selected metrics and cohorts.
//!
//! [`RequestMatrix`] derives one [`ResponseSlot`] per selected (metric,
//! cohort) pair, metric outer and cohort inner, each in selection-list
//! order. Recomputation is debounced by one queue tick: a burst of toggles
//! schedules a single rebuild, and readers may see the previous matrix until
//! it runs. [`RequestMatrix::flush`] forces a pending rebuild.
//!
//! A slot whose pair survives a rebuild is carried over as the same `Rc`,
//! so state keyed on it (an open tab) stays attached.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use wm_reactive::{BindingScope, Observable};

use crate::entity::{EntityId, EntityRef, Family};
use crate::selection::SelectionStore;

/// One (metric, cohort) pairing of a report request.
pub struct ResponseSlot {
    name: String,
    cohort: EntityRef,
    metric: EntityRef,
    tab_id: String,
}

impl ResponseSlot {
    #[must_use]
    pub fn new(metric: EntityRef, cohort: EntityRef, prefix: &str) -> Self {
        Self {
            name: format!("{} - {}", metric.label(), cohort.name()),
            tab_id: tab_id(prefix, metric.id(), cohort.id()),
            cohort,
            metric,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn cohort(&self) -> &EntityRef {
        &self.cohort
    }

    #[must_use]
    pub fn metric(&self) -> &EntityRef {
        &self.metric
    }

    #[must_use]
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// `{name, cohort, metric}` as the report endpoint expects it.
    #[must_use]
    pub fn to_submission(&self) -> Value {
        json!({
            "name": self.name,
            "cohort": self.cohort.to_submission(),
            "metric": self.metric.to_submission(),
        })
    }
}

impl fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("name", &self.name)
            .field("tab_id", &self.tab_id)
            .finish()
    }
}

/// `<prefix><metric id>-for-<cohort id>`
#[must_use]
pub fn tab_id(prefix: &str, metric: &EntityId, cohort: &EntityId) -> String {
    format!("{prefix}{metric}-for-{cohort}")
}

/// Shared slot handle. Equality is identity.
#[derive(Clone)]
pub struct SlotRef(Rc<ResponseSlot>);

impl SlotRef {
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SlotRef {
    type Target = ResponseSlot;

    fn deref(&self) -> &ResponseSlot {
        &self.0
    }
}

impl PartialEq for SlotRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SlotRef {}

impl fmt::Debug for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Build the matrix, reusing every slot of `previous` whose pair is unchanged.
#[must_use]
pub fn cross_product(
    metrics: &[EntityRef],
    cohorts: &[EntityRef],
    prefix: &str,
    previous: &[SlotRef],
) -> Vec<SlotRef> {
    let mut slots = Vec::with_capacity(metrics.len() * cohorts.len());
    for metric in metrics {
        for cohort in cohorts {
            let reused = previous
                .iter()
                .find(|slot| slot.metric.ptr_eq(metric) && slot.cohort.ptr_eq(cohort));
            slots.push(match reused {
                Some(slot) => slot.clone(),
                None => SlotRef(Rc::new(ResponseSlot::new(metric.clone(), cohort.clone(), prefix))),
            });
        }
    }
    slots
}

static NEXT_MATRIX: AtomicU64 = AtomicU64::new(0);

struct MatrixInner {
    store: SelectionStore,
    slots: Observable<Vec<SlotRef>>,
    stale: Cell<bool>,
    recomputes: Cell<u64>,
    key: String,
}

impl MatrixInner {
    fn recompute(&self) {
        let metrics = self.store.selected(Family::Metric);
        let cohorts = self.store.selected(Family::Cohort);
        let previous = self.slots.get();
        let next = cross_product(&metrics, &cohorts, &self.store.config().tab_id_prefix, &previous);

        let reused = next
            .iter()
            .filter(|slot| previous.iter().any(|p| p.ptr_eq(slot)))
            .count();
        tracing::debug!(
            metrics = metrics.len(),
            cohorts = cohorts.len(),
            slots = next.len(),
            reused,
            "request matrix recomputed"
        );

        self.stale.set(false);
        self.recomputes.set(self.recomputes.get() + 1);
        self.slots.set(next);
    }
}

/// Debounced derivation of response slots from a [`SelectionStore`].
pub struct RequestMatrix {
    inner: Rc<MatrixInner>,
    _watch: BindingScope,
}

impl RequestMatrix {
    #[must_use]
    pub fn new(store: SelectionStore) -> Self {
        let key = format!("request-matrix-{}", NEXT_MATRIX.fetch_add(1, Ordering::Relaxed));
        let inner = Rc::new(MatrixInner {
            store,
            slots: Observable::new(Vec::new()),
            stale: Cell::new(false),
            recomputes: Cell::new(0),
            key,
        });
        inner.recompute();

        let mut watch = BindingScope::new();
        let weak: Weak<MatrixInner> = Rc::downgrade(&inner);
        watch.subscribe(inner.store.revision(), move |_| {
            let Some(matrix) = weak.upgrade() else {
                return;
            };
            matrix.stale.set(true);
            let pending = Weak::clone(&weak);
            matrix.store.queue().schedule_keyed(matrix.key.clone(), move || {
                if let Some(matrix) = pending.upgrade()
                    && matrix.stale.get()
                {
                    matrix.recompute();
                }
            });
        });

        Self {
            inner,
            _watch: watch,
        }
    }

    /// Current slots; may lag the selection until the debounce fires.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotRef> {
        self.inner.slots.get()
    }

    /// The observable slot list, for consumers that react to rebuilds.
    #[must_use]
    pub fn observable(&self) -> &Observable<Vec<SlotRef>> {
        &self.inner.slots
    }

    /// A selection change has not been folded in yet.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.stale.get()
    }

    /// Rebuild now if a change is pending.
    pub fn flush(&self) {
        if self.inner.stale.get() {
            self.inner.recompute();
        }
    }

    /// Number of rebuilds so far, the initial one included.
    #[must_use]
    pub fn recomputes(&self) -> u64 {
        self.inner.recomputes.get()
    }

    /// Slots serialized for submission.
    #[must_use]
    pub fn to_submission(&self) -> Value {
        Value::Array(self.slots().iter().map(|slot| slot.to_submission()).collect())
    }
}

impl fmt::Debug for RequestMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMatrix")
            .field("slots", &self.inner.slots.with(Vec::len))
            .field("stale", &self.is_stale())
            .finish()
    }
}
