#![forbid(unsafe_code)]

//! The two selectable collections and the fetches selection triggers.
//!
//! Selecting a metric fetches its configuration fragment the first time and
//! rebinds the cached fragment afterwards; selecting a cohort fetches its
//! membership once. Deselecting a metric drops its rendered configuration
//! and every field subscription.
//!
//! Responses may arrive in any order. Each fetch carries the entity's
//! current ticket; deselecting bumps the ticket, and a completion is applied
//! only while its ticket is current and the entity is still selected.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;
use web_time::Instant;
use wm_reactive::{BatchScope, BindingScope, Observable, TaskQueue};

use crate::config::ComposeConfig;
use crate::entity::{EntityId, EntityRecord, EntityRef, Family, LoadState, SelectableEntity};
use crate::envelope::Notices;
use crate::error::{ComposeError, ComposeResult, TransportError};
use crate::form::Defaults;
use crate::transport::{Request, Transport};

struct StoreInner {
    config: Rc<ComposeConfig>,
    cohorts: Observable<Vec<EntityRef>>,
    metrics: Observable<Vec<EntityRef>>,
    /// Per-family subscriptions to each entity's `selected` flag.
    cohort_listeners: RefCell<BindingScope>,
    metric_listeners: RefCell<BindingScope>,
    revision: Observable<u64>,
    transport: Rc<dyn Transport>,
    queue: TaskQueue,
    notices: Notices,
    defaults: Defaults,
}

/// Cohorts and metrics with their selection state. Clones share state.
#[derive(Clone)]
pub struct SelectionStore {
    inner: Rc<StoreInner>,
}

impl SelectionStore {
    #[must_use]
    pub fn new(
        config: Rc<ComposeConfig>,
        transport: Rc<dyn Transport>,
        queue: TaskQueue,
        notices: Notices,
        defaults: Defaults,
    ) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                config,
                cohorts: Observable::new(Vec::new()),
                metrics: Observable::new(Vec::new()),
                cohort_listeners: RefCell::new(BindingScope::new()),
                metric_listeners: RefCell::new(BindingScope::new()),
                revision: Observable::new(0),
                transport,
                queue,
                notices,
                defaults,
            }),
        }
    }

    /// Replace a collection wholesale. Every new item starts unselected;
    /// the previous items' forms and listeners are released.
    pub fn set_all(&self, family: Family, records: Vec<EntityRecord>) {
        let inner = &self.inner;
        let _span =
            tracing::info_span!("selection.set_all", %family, count = records.len()).entered();

        inner.listeners(family).borrow_mut().clear();
        for old in inner.list(family).get() {
            old.invalidate_request();
            old.clear_configuration();
        }

        let entities: Vec<EntityRef> = records
            .into_iter()
            .map(|record| {
                EntityRef::new(SelectableEntity::new(family, record, Rc::clone(&inner.config)))
            })
            .collect();

        {
            let mut listeners = inner.listeners(family).borrow_mut();
            for entity in &entities {
                let weak: Weak<StoreInner> = Rc::downgrade(inner);
                let target = entity.clone();
                listeners.subscribe(entity.selected(), move |selected| {
                    if let Some(inner) = weak.upgrade() {
                        inner.selection_changed(&target, *selected);
                    }
                });
            }
        }

        inner.list(family).set(entities);
        inner.bump();
    }

    /// Parse a list-endpoint payload (`{"cohorts": [...]}`) and apply it.
    pub fn set_all_from_payload(&self, family: Family, payload: &Value) -> ComposeResult<usize> {
        let list = payload.get(family.plural()).cloned().ok_or_else(|| {
            TransportError::Malformed(format!("missing '{}' list", family.plural()))
        })?;
        let records: Vec<EntityRecord> = serde_json::from_value(list)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let count = records.len();
        self.set_all(family, records);
        Ok(count)
    }

    /// Flip selection.
    pub fn toggle(&self, entity: &EntityRef) {
        self.select(entity, !entity.is_selected());
    }

    pub fn select(&self, entity: &EntityRef, selected: bool) {
        entity.selected().set(selected);
    }

    /// Select every entity of `family`, notifying once per entity.
    pub fn select_all(&self, family: Family) {
        self.set_family(family, true);
    }

    pub fn clear_selection(&self, family: Family) {
        self.set_family(family, false);
    }

    fn set_family(&self, family: Family, selected: bool) {
        let _batch = BatchScope::new();
        for entity in self.inner.list(family).get() {
            entity.selected().set(selected);
        }
    }

    /// Select the entity whose id matches `raw`. Returns whether one did.
    pub fn preselect(&self, family: Family, raw: &str) -> bool {
        let found = self
            .inner
            .list(family)
            .with(|list| list.iter().find(|e| e.id().matches(raw)).cloned());
        match found {
            Some(entity) => {
                self.select(&entity, true);
                true
            }
            None => {
                tracing::debug!(%family, id = raw, "preselect id not found");
                false
            }
        }
    }

    /// Selected entities in collection order.
    #[must_use]
    pub fn selected(&self, family: Family) -> Vec<EntityRef> {
        self.inner
            .list(family)
            .with(|list| list.iter().filter(|e| e.is_selected()).cloned().collect())
    }

    #[must_use]
    pub fn entities(&self, family: Family) -> Vec<EntityRef> {
        self.inner.list(family).get()
    }

    /// The observable collection itself.
    #[must_use]
    pub fn collection(&self, family: Family) -> &Observable<Vec<EntityRef>> {
        self.inner.list(family)
    }

    pub fn find(&self, family: Family, id: &EntityId) -> ComposeResult<EntityRef> {
        self.inner
            .list(family)
            .with(|list| list.iter().find(|e| e.id() == id).cloned())
            .ok_or_else(|| ComposeError::UnknownEntity {
                family,
                id: id.to_string(),
            })
    }

    /// Entities whose name contains `filter`, ignoring case.
    #[must_use]
    pub fn filtered(&self, family: Family, filter: &str) -> Vec<EntityRef> {
        if filter.is_empty() {
            return self.entities(family);
        }
        let needle = filter.to_lowercase();
        self.inner.list(family).with(|list| {
            list.iter()
                .filter(|e| e.name().to_lowercase().contains(&needle))
                .cloned()
                .collect()
        })
    }

    /// Bumped on every selection change and collection replacement.
    #[must_use]
    pub fn revision(&self) -> &Observable<u64> {
        &self.inner.revision
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.inner.notices
    }

    #[must_use]
    pub fn defaults(&self) -> &Defaults {
        &self.inner.defaults
    }

    #[must_use]
    pub fn config(&self) -> &Rc<ComposeConfig> {
        &self.inner.config
    }

    /// Rebind `metric` to freshly returned markup (after a save).
    pub fn apply_configuration(&self, metric: &EntityRef, content: &str) {
        self.inner.apply_configuration(metric, content);
    }

    /// Handle for completions that must not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakSelectionStore {
        WeakSelectionStore(Rc::downgrade(&self.inner))
    }
}

/// Non-owning [`SelectionStore`] handle.
#[derive(Clone)]
pub struct WeakSelectionStore(Weak<StoreInner>);

impl WeakSelectionStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<SelectionStore> {
        self.0.upgrade().map(|inner| SelectionStore { inner })
    }
}

impl StoreInner {
    fn list(&self, family: Family) -> &Observable<Vec<EntityRef>> {
        match family {
            Family::Cohort => &self.cohorts,
            Family::Metric => &self.metrics,
        }
    }

    fn listeners(&self, family: Family) -> &RefCell<BindingScope> {
        match family {
            Family::Cohort => &self.cohort_listeners,
            Family::Metric => &self.metric_listeners,
        }
    }

    fn bump(&self) {
        self.revision.update(|r| *r += 1);
    }

    fn selection_changed(self: &Rc<Self>, entity: &EntityRef, selected: bool) {
        tracing::debug!(
            family = %entity.family(),
            id = %entity.id(),
            selected,
            "selection changed"
        );
        if selected {
            self.on_selected(entity);
        } else {
            entity.invalidate_request();
            if entity.family() == Family::Metric {
                entity.clear_configuration();
            }
        }
        self.bump();
    }

    fn on_selected(self: &Rc<Self>, entity: &EntityRef) {
        match entity.family() {
            Family::Metric => {
                if let Some(cached) = entity.cached_configuration() {
                    self.apply_configuration(entity, &cached);
                } else if entity.load_state() != LoadState::Loading {
                    self.fetch(
                        entity,
                        Request::ConfigurationFragment {
                            metric_name: entity.name().to_string(),
                        },
                    );
                }
            }
            Family::Cohort => {
                if entity.load_state() == LoadState::Idle {
                    self.fetch(
                        entity,
                        Request::EntityDetail {
                            family: Family::Cohort,
                            id: entity.id().clone(),
                        },
                    );
                }
            }
        }
    }

    fn fetch(self: &Rc<Self>, entity: &EntityRef, request: Request) {
        let ticket = entity.begin_request();
        tracing::debug!(request = %request, ticket, "fetch issued");

        let weak = Rc::downgrade(self);
        let target = entity.clone();
        let queue = self.queue.clone();
        let issued = Instant::now();
        self.transport.send(
            request,
            Box::new(move |result| {
                tracing::trace!(
                    ticket,
                    elapsed_us = issued.elapsed().as_micros() as u64,
                    ok = result.is_ok(),
                    "fetch completed"
                );
                queue.schedule(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.complete(&target, ticket, result);
                    }
                });
            }),
        );
    }

    fn complete(&self, entity: &EntityRef, ticket: u64, result: Result<Value, TransportError>) {
        if !entity.accepts(ticket) {
            tracing::debug!(id = %entity.id(), ticket, "stale response dropped");
            return;
        }

        let Some(payload) = self.notices.handle(result) else {
            entity.fail_request();
            return;
        };

        match entity.family() {
            Family::Metric => match payload.as_str() {
                Some(markup) => self.apply_configuration(entity, markup),
                None => {
                    entity.fail_request();
                    self.notices
                        .failure(&TransportError::Malformed("configuration is not markup".into()));
                }
            },
            Family::Cohort => entity.apply_details(payload),
        }
    }

    fn apply_configuration(&self, entity: &EntityRef, content: &str) {
        entity.apply_configuration(content, &self.defaults);
        let rendered = entity.clone();
        self.queue.schedule(move || rendered.form().render());
    }
}

impl std::fmt::Debug for SelectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionStore")
            .field("cohorts", &self.inner.cohorts.with(Vec::len))
            .field("metrics", &self.inner.metrics.with(Vec::len))
            .field("revision", &self.inner.revision.get())
            .finish()
    }
}
