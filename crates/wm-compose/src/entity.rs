#![forbid(unsafe_code)]

//! Selectable cohorts and metrics.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wm_reactive::Observable;

use crate::config::ComposeConfig;
use crate::form::{Defaults, FormContainer};

/// The two entity collections. They share a shape but are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Cohort,
    Metric,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Cohort, Family::Metric];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cohort => "cohort",
            Self::Metric => "metric",
        }
    }

    /// Key of the list in a list-endpoint payload.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Cohort => "cohorts",
            Self::Metric => "metrics",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier as the list endpoint delivers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl EntityId {
    /// Compare against an id that arrived as text (a URL fragment).
    #[must_use]
    pub fn matches(&self, raw: &str) -> bool {
        match self {
            Self::Number(n) => raw.trim().parse::<i64>().is_ok_and(|r| r == *n),
            Self::Text(text) => text == raw,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// One record of a list endpoint. Display fields other than `id`, `name`
/// and `label` are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityRecord {
    #[must_use]
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            label: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Display name: the label when there is one, else the name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Output options of a metric in a report request.
#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub individual_results: Observable<bool>,
    pub aggregate_results: Observable<bool>,
    pub aggregate_sum: Observable<bool>,
    pub aggregate_average: Observable<bool>,
    pub aggregate_standard_deviation: Observable<bool>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            individual_results: Observable::new(false),
            aggregate_results: Observable::new(true),
            aggregate_sum: Observable::new(true),
            aggregate_average: Observable::new(false),
            aggregate_standard_deviation: Observable::new(false),
        }
    }
}

impl AggregationOptions {
    /// Whether the request would produce any output at all.
    #[must_use]
    pub fn output_configured(&self) -> bool {
        self.individual_results.get()
            || (self.aggregate_results.get()
                && (self.aggregate_sum.get()
                    || self.aggregate_average.get()
                    || self.aggregate_standard_deviation.get()))
    }

    /// Flags under the keys the report endpoint reads.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        [
            ("individualResults", &self.individual_results),
            ("aggregateResults", &self.aggregate_results),
            ("aggregateSum", &self.aggregate_sum),
            ("aggregateAverage", &self.aggregate_average),
            ("aggregateStandardDeviation", &self.aggregate_standard_deviation),
        ]
        .into_iter()
        .map(|(key, flag)| (key.to_string(), Value::Bool(flag.get())))
        .collect()
    }
}

/// Where an entity's fetched data stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
}

/// A cohort or metric with its selection and fetched state.
pub struct SelectableEntity {
    family: Family,
    record: EntityRecord,
    container_id: String,
    selected: Observable<bool>,
    configuration: Observable<String>,
    cached: RefCell<Option<String>>,
    details: Observable<Option<Value>>,
    form: RefCell<FormContainer>,
    load: Cell<LoadState>,
    ticket: Cell<u64>,
    aggregation: Option<AggregationOptions>,
}

impl SelectableEntity {
    #[must_use]
    pub fn new(family: Family, record: EntityRecord, config: Rc<ComposeConfig>) -> Self {
        let container_id = match family {
            Family::Metric => format!("{}{}", config.tab_id_prefix, record.id),
            Family::Cohort => format!("cohort-{}", record.id),
        };
        Self {
            family,
            form: RefCell::new(FormContainer::new(container_id.clone(), config)),
            container_id,
            record,
            selected: Observable::new(false),
            configuration: Observable::new(String::new()),
            cached: RefCell::new(None),
            details: Observable::new(None),
            load: Cell::new(LoadState::Idle),
            ticket: Cell::new(0),
            aggregation: (family == Family::Metric).then(AggregationOptions::default),
        }
    }

    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.record.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.record.label()
    }

    #[must_use]
    pub fn record(&self) -> &EntityRecord {
        &self.record
    }

    /// Id of the container the entity's configuration renders into.
    #[must_use]
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    #[must_use]
    pub fn selected(&self) -> &Observable<bool> {
        &self.selected
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected.get()
    }

    /// Rendered configuration; empty while deselected.
    #[must_use]
    pub fn configuration(&self) -> &Observable<String> {
        &self.configuration
    }

    /// Last configuration fetched or saved, kept across deselection.
    #[must_use]
    pub fn cached_configuration(&self) -> Option<String> {
        self.cached.borrow().clone()
    }

    /// Extended record from the detail endpoint (cohort membership).
    #[must_use]
    pub fn details(&self) -> &Observable<Option<Value>> {
        &self.details
    }

    #[must_use]
    pub fn form(&self) -> Ref<'_, FormContainer> {
        self.form.borrow()
    }

    pub(crate) fn form_mut(&self) -> RefMut<'_, FormContainer> {
        self.form.borrow_mut()
    }

    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load.get()
    }

    /// `None` for cohorts.
    #[must_use]
    pub fn aggregation(&self) -> Option<&AggregationOptions> {
        self.aggregation.as_ref()
    }

    #[must_use]
    pub fn output_configured(&self) -> bool {
        self.aggregation
            .as_ref()
            .is_none_or(AggregationOptions::output_configured)
    }

    /// Start a fetch and return its ticket.
    pub(crate) fn begin_request(&self) -> u64 {
        let ticket = self.ticket.get() + 1;
        self.ticket.set(ticket);
        self.load.set(LoadState::Loading);
        ticket
    }

    /// Start a save and return its ticket. Supersedes any fetch or earlier
    /// save still in flight without touching the load state.
    pub(crate) fn begin_save(&self) -> u64 {
        let ticket = self.ticket.get() + 1;
        self.ticket.set(ticket);
        ticket
    }

    /// A completion for `ticket` may still be applied.
    pub(crate) fn accepts(&self, ticket: u64) -> bool {
        self.ticket.get() == ticket && self.is_selected()
    }

    /// Make any in-flight completion stale.
    pub(crate) fn invalidate_request(&self) {
        self.ticket.set(self.ticket.get() + 1);
        if self.load.get() == LoadState::Loading {
            self.load.set(LoadState::Idle);
        }
    }

    pub(crate) fn fail_request(&self) {
        self.load.set(LoadState::Idle);
    }

    /// A failed save leaves a loaded entity loaded; only an interrupted
    /// fetch goes back to idle.
    pub(crate) fn fail_save(&self) {
        if self.load.get() == LoadState::Loading {
            self.load.set(LoadState::Idle);
        }
    }

    /// Render `content` and bind its fields.
    pub(crate) fn apply_configuration(&self, content: &str, defaults: &Defaults) {
        self.load.set(LoadState::Loaded);
        *self.cached.borrow_mut() = Some(content.to_string());
        self.form_mut().bind(content, defaults);
        self.configuration.set(content.to_string());
    }

    pub(crate) fn apply_details(&self, details: Value) {
        self.load.set(LoadState::Loaded);
        self.details.set(Some(details));
    }

    /// Drop the rendered configuration and every field subscription.
    pub(crate) fn clear_configuration(&self) {
        self.form_mut().unbind();
        self.configuration.set(String::new());
    }

    /// Record plus everything the report endpoint needs, without
    /// display-only state.
    #[must_use]
    pub fn to_submission(&self) -> Value {
        let mut object = match serde_json::to_value(&self.record) {
            Ok(Value::Object(object)) => object,
            _ => Map::new(),
        };
        if let Some(aggregation) = &self.aggregation {
            object.extend(self.form().values());
            object.extend(aggregation.to_json());
        }
        Value::Object(object)
    }
}

impl fmt::Debug for SelectableEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectableEntity")
            .field("family", &self.family)
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("selected", &self.is_selected())
            .field("load", &self.load.get())
            .finish_non_exhaustive()
    }
}

/// Shared handle to an entity. Equality is identity.
#[derive(Clone)]
pub struct EntityRef(Rc<SelectableEntity>);

impl EntityRef {
    #[must_use]
    pub fn new(entity: SelectableEntity) -> Self {
        Self(Rc::new(entity))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for EntityRef {
    type Target = SelectableEntity;

    fn deref(&self) -> &SelectableEntity {
        &self.0
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metric(id: i64, name: &str) -> SelectableEntity {
        SelectableEntity::new(
            Family::Metric,
            EntityRecord::new(id, name),
            Rc::new(ComposeConfig::default()),
        )
    }

    #[test]
    fn records_keep_extra_fields() {
        let record: EntityRecord = serde_json::from_value(json!({
            "id": 3,
            "name": "NamespaceEdits",
            "label": "Edits",
            "description": "edits in namespaces",
        }))
        .expect("record parses");
        assert_eq!(record.id, EntityId::Number(3));
        assert_eq!(record.label(), "Edits");
        assert_eq!(record.extra["description"], json!("edits in namespaces"));
        assert_eq!(
            serde_json::to_value(&record).expect("serializes")["description"],
            json!("edits in namespaces")
        );
    }

    #[test]
    fn ids_display_and_match_fragments() {
        assert_eq!(EntityId::from(12).to_string(), "12");
        assert!(EntityId::from(12).matches("12"));
        assert!(!EntityId::from(12).matches("12a"));
        assert!(EntityId::from("abc").matches("abc"));
    }

    #[test]
    fn aggregation_defaults_produce_output() {
        let options = AggregationOptions::default();
        assert!(options.output_configured());

        options.aggregate_sum.set(false);
        assert!(!options.output_configured());
        options.aggregate_standard_deviation.set(true);
        assert!(options.output_configured());

        options.aggregate_results.set(false);
        assert!(!options.output_configured());
        options.individual_results.set(true);
        assert!(options.output_configured());
    }

    #[test]
    fn container_id_uses_prefix() {
        assert_eq!(metric(9, "Edits").container_id(), "metric-9");
    }

    #[test]
    fn stale_tickets_are_rejected() {
        let entity = metric(1, "Edits");
        entity.selected().set(true);
        let first = entity.begin_request();
        assert!(entity.accepts(first));

        entity.invalidate_request();
        assert_eq!(entity.load_state(), LoadState::Idle);
        assert!(!entity.accepts(first));

        let second = entity.begin_request();
        assert!(entity.accepts(second));
        entity.selected().set(false);
        assert!(!entity.accepts(second), "deselected entities take nothing");
    }

    #[test]
    fn saves_supersede_earlier_tickets() {
        let entity = metric(1, "Edits");
        entity.selected().set(true);
        let fetch = entity.begin_request();
        entity.apply_configuration("<input name=\"a\" value=\"1\">", &Defaults::default());

        let first = entity.begin_save();
        let second = entity.begin_save();
        assert!(!entity.accepts(fetch));
        assert!(!entity.accepts(first));
        assert!(entity.accepts(second));
        assert_eq!(entity.load_state(), LoadState::Loaded);

        entity.fail_save();
        assert_eq!(entity.load_state(), LoadState::Loaded);

        entity.invalidate_request();
        assert!(!entity.accepts(second));
    }

    #[test]
    fn submission_strips_display_state() {
        let entity = metric(9, "Edits");
        entity.apply_configuration(
            r#"<input name="namespaces" value="0">"#,
            &Defaults::default(),
        );
        let submission = entity.to_submission();
        assert_eq!(submission["id"], json!(9));
        assert_eq!(submission["namespaces"], json!("0"));
        assert_eq!(submission["aggregateSum"], json!(true));
        assert!(submission.get("configure").is_none());
        assert!(submission.get("tabId").is_none());
    }
}
