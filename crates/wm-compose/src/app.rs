#![forbid(unsafe_code)]

//! Application state of the report composer.
//!
//! [`ReportBuilder`] is constructed once per page and owns everything the
//! composer needs: configuration, transport, task queue, the selection
//! store, the request matrix, notices, and the defaults every dynamic form
//! follows. Components receive what they need from it explicitly.

use std::rc::Rc;

use indexmap::IndexSet;
use serde_json::Value;
use wm_reactive::{Observable, TaskQueue};

use crate::config::ComposeConfig;
use crate::entity::{EntityRef, Family};
use crate::envelope::Notices;
use crate::error::{ComposeError, ComposeResult, TransportError};
use crate::form::Defaults;
use crate::matrix::RequestMatrix;
use crate::selection::SelectionStore;
use crate::timezone::Timezone;
use crate::transport::{Request, Transport};

pub const UNSAVED_CONFIGURATION: &str =
    "Please configure and click Save Configuration for each selected metric.";
pub const EMPTY_REQUEST: &str = "Please select at least one cohort and one metric.";
pub const INVALID_CONFIGURATION: &str =
    "The configuration was not all valid.  Please check all the metrics below.";
pub const CONFIGURATION_SAVED: &str = "Configuration Saved";

pub struct ReportBuilder {
    config: Rc<ComposeConfig>,
    transport: Rc<dyn Transport>,
    queue: TaskQueue,
    notices: Notices,
    defaults: Defaults,
    store: SelectionStore,
    matrix: RequestMatrix,
    cohort_filter: Observable<String>,
}

impl ReportBuilder {
    #[must_use]
    pub fn new(config: ComposeConfig, transport: Rc<dyn Transport>, queue: TaskQueue) -> Self {
        let config = Rc::new(config);
        let notices = Notices::new(&config.failure_message);
        let defaults = Defaults::new(Observable::new(config.default_timezone.clone()));
        let store = SelectionStore::new(
            Rc::clone(&config),
            Rc::clone(&transport),
            queue.clone(),
            notices.clone(),
            defaults.clone(),
        );
        let matrix = RequestMatrix::new(store.clone());

        tracing::info!(
            tab_id_prefix = %config.tab_id_prefix,
            default_timezone = %config.default_timezone,
            "report builder created"
        );

        Self {
            config,
            transport,
            queue,
            notices,
            defaults,
            store,
            matrix,
            cohort_filter: Observable::new(String::new()),
        }
    }

    /// Request both entity lists. Once cohorts arrive, the cohort whose id
    /// matches `preselect_cohort` (a URL fragment) is selected.
    pub fn load(&self, preselect_cohort: Option<&str>) {
        for family in Family::ALL {
            let preselect = match family {
                Family::Cohort => preselect_cohort.map(str::to_string),
                Family::Metric => None,
            };
            let store = self.store.downgrade();
            let queue = self.queue.clone();
            self.transport.send(
                Request::ListEntities(family),
                Box::new(move |result| {
                    queue.schedule(move || {
                        let Some(store) = store.upgrade() else {
                            return;
                        };
                        let Some(payload) = store.notices().handle(result) else {
                            return;
                        };
                        match store.set_all_from_payload(family, &payload) {
                            Ok(count) => {
                                tracing::info!(%family, count, "entity list loaded");
                                if let Some(id) = preselect {
                                    store.preselect(family, &id);
                                }
                            }
                            Err(ComposeError::Transport(err)) => store.notices().failure(&err),
                            Err(err) => store.notices().error(err.to_string()),
                        }
                    });
                }),
            );
        }
    }

    pub fn toggle(&self, entity: &EntityRef) {
        self.store.toggle(entity);
    }

    /// Post `metric`'s resolved fields and rebind the returned fragment.
    ///
    /// Only the latest save is applied, and only while the metric stays
    /// selected: a later save, a fetch or a deselect makes it stale.
    pub fn save_configuration(&self, metric: &EntityRef) -> ComposeResult<()> {
        if metric.family() != Family::Metric {
            return Err(ComposeError::NotAMetric {
                family: metric.family(),
                id: metric.id().to_string(),
            });
        }
        let fields = match metric.to_submission() {
            Value::Object(fields) => fields,
            _ => serde_json::Map::new(),
        };
        let request = Request::SaveConfiguration {
            metric_id: metric.id().clone(),
            metric_name: metric.name().to_string(),
            fields,
        };

        let ticket = metric.begin_save();
        tracing::debug!(request = %request, ticket, "save issued");

        let store = self.store.downgrade();
        let queue = self.queue.clone();
        let target = metric.clone();
        self.transport.send(
            request,
            Box::new(move |result| {
                queue.schedule(move || {
                    let Some(store) = store.upgrade() else {
                        return;
                    };
                    if !target.accepts(ticket) {
                        tracing::debug!(id = %target.id(), ticket, "stale save response dropped");
                        return;
                    }
                    let Some(payload) = store.notices().handle(result) else {
                        target.fail_save();
                        return;
                    };
                    let Some(markup) = payload.as_str() else {
                        target.fail_save();
                        store.notices().failure(&TransportError::Malformed(
                            "saved configuration is not markup".into(),
                        ));
                        return;
                    };
                    store.apply_configuration(&target, markup);
                    if target.form().has_validation_errors() {
                        store.notices().warning(INVALID_CONFIGURATION);
                    } else {
                        store.notices().success(CONFIGURATION_SAVED);
                    }
                });
            }),
        );
        Ok(())
    }

    /// Check the request and post it. A refused request shows a warning and
    /// returns [`ComposeError::Incomplete`] without contacting the server.
    pub fn submit(&self) -> ComposeResult<()> {
        self.matrix.flush();
        let _span = tracing::info_span!("report.submit").entered();

        if let Err(err) = self.check_request() {
            if let ComposeError::Incomplete(message) = &err {
                self.notices.warning(message.clone());
            }
            return Err(err);
        }

        let responses = self.matrix.to_submission();
        tracing::info!(
            responses = responses.as_array().map_or(0, Vec::len),
            "submitting report request"
        );

        let notices = self.notices.clone();
        let queue = self.queue.clone();
        self.transport.send(
            Request::Submit { responses },
            Box::new(move |result| {
                queue.schedule(move || {
                    if let Some(payload) = notices.handle(result) {
                        notices.warning(format!("Unexpected: {payload}"));
                    }
                });
            }),
        );
        Ok(())
    }

    fn check_request(&self) -> ComposeResult<()> {
        let metrics = self.store.selected(Family::Metric);
        if metrics.iter().any(|m| m.form().has_validation_errors()) {
            return Err(ComposeError::Incomplete(UNSAVED_CONFIGURATION.to_string()));
        }

        let slots = self.matrix.slots();
        if slots.is_empty() {
            return Err(ComposeError::Incomplete(EMPTY_REQUEST.to_string()));
        }

        let without_output: IndexSet<&str> = slots
            .iter()
            .filter(|slot| !slot.metric().output_configured())
            .map(|slot| slot.metric().label())
            .collect();
        if !without_output.is_empty() {
            let labels: Vec<&str> = without_output.into_iter().collect();
            return Err(ComposeError::Incomplete(format!(
                "{} do not have any output selected.",
                labels.join(", ")
            )));
        }
        Ok(())
    }

    /// Cohorts matching the current filter text.
    #[must_use]
    pub fn filtered_cohorts(&self) -> Vec<EntityRef> {
        self.cohort_filter
            .with(|filter| self.store.filtered(Family::Cohort, filter))
    }

    #[must_use]
    pub fn cohort_filter(&self) -> &Observable<String> {
        &self.cohort_filter
    }

    /// Offset every date field is interpreted in.
    #[must_use]
    pub fn timezone(&self) -> &Observable<String> {
        self.defaults.timezone()
    }

    pub fn set_timezone(&self, timezone: &Timezone) -> ComposeResult<()> {
        timezone.offset()?;
        self.defaults.timezone().set(timezone.value.clone());
        Ok(())
    }

    #[must_use]
    pub fn store(&self) -> &SelectionStore {
        &self.store
    }

    #[must_use]
    pub fn matrix(&self) -> &RequestMatrix {
        &self.matrix
    }

    #[must_use]
    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    #[must_use]
    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    #[must_use]
    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }
}

impl std::fmt::Debug for ReportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportBuilder")
            .field("store", &self.store)
            .field("matrix", &self.matrix)
            .field("notices", &self.notices)
            .finish_non_exhaustive()
    }
}
