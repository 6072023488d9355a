#![forbid(unsafe_code)]

//! Binding fetched configuration markup into live fields.
//!
//! A [`FormContainer`] owns the live state of one rendered configuration
//! fragment. [`FormContainer::bind`] scans the markup, resolves an initial
//! value for every named control and publishes it as a [`LiveField`] in an
//! ordered [`FieldMap`]. Fields whose name also appears in [`Defaults`]
//! keep following that default after the form is rendered.
//!
//! Fields and the subscriptions feeding them live in one [`BoundForm`];
//! rebinding or unbinding drops it as a whole.
//!
//! Initial value precedence, per control:
//!
//! 1. a same-named default that currently has a value;
//! 2. the checked state of a checkbox;
//! 3. the `data-value` of a date-widget container;
//! 4. the control's own value, else `""`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wm_reactive::{BindingScope, Observable};

use crate::config::ComposeConfig;
use crate::datesync::{DatePicker, DateSync};
use crate::markup::{self, Control, ControlKind};

/// Value of a non-date field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveValue {
    Flag(bool),
    Text(String),
}

impl LiveValue {
    /// Text form; flags render as `"true"`/`"false"`.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Flag(flag) => flag.to_string(),
        }
    }

    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Flag(flag) => Value::Bool(*flag),
        }
    }
}

impl From<&str> for LiveValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LiveValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for LiveValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// A named piece of live form state.
#[derive(Debug, Clone)]
pub enum LiveField {
    Value(Observable<LiveValue>),
    Date(DateSync),
}

impl LiveField {
    #[must_use]
    pub fn as_value(&self) -> Option<&Observable<LiveValue>> {
        match self {
            Self::Value(value) => Some(value),
            Self::Date(_) => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<&DateSync> {
        match self {
            Self::Date(date) => Some(date),
            Self::Value(_) => None,
        }
    }

    /// Value as submitted: the live value, or the zoned timestamp of a date.
    #[must_use]
    pub fn resolved(&self) -> Value {
        match self {
            Self::Value(value) => value.with(LiveValue::to_json),
            Self::Date(date) => Value::String(date.zoned().get()),
        }
    }

    /// Write `value` the way an outside default would.
    fn push(&self, value: LiveValue) {
        match self {
            Self::Value(field) => field.set(value),
            Self::Date(date) => date.push_zoned(value.to_text()),
        }
    }
}

/// Ordered map of live fields, in markup order.
pub type FieldMap = IndexMap<String, LiveField>;

/// Where a default comes from.
#[derive(Debug, Clone)]
pub enum DefaultSource {
    /// `None` counts as "no default" for the initial value.
    Value(Observable<Option<LiveValue>>),
    /// A date default seeds from its local value and feeds later zoned values.
    Date(DateSync),
}

impl DefaultSource {
    fn initial(&self) -> Option<LiveValue> {
        match self {
            Self::Value(value) => value.get(),
            Self::Date(date) => {
                if date.zoned().with(String::is_empty) {
                    None
                } else {
                    Some(LiveValue::Text(date.local().get()))
                }
            }
        }
    }

    fn follow(&self, scope: &mut BindingScope, field: LiveField) {
        match self {
            Self::Value(source) => scope.subscribe(source, move |value| {
                if let Some(value) = value {
                    field.push(value.clone());
                }
            }),
            Self::Date(source) => scope.subscribe(source.zoned(), move |zoned| {
                field.push(LiveValue::Text(zoned.clone()));
            }),
        }
    }
}

#[derive(Default)]
struct DefaultsInner {
    entries: RefCell<IndexMap<String, DefaultSource>>,
    timezone: Observable<String>,
}

/// Named defaults shared by every form, plus the timezone offset date
/// fields follow. Clones share state.
#[derive(Clone, Default)]
pub struct Defaults {
    inner: Rc<DefaultsInner>,
}

impl Defaults {
    #[must_use]
    pub fn new(timezone: Observable<String>) -> Self {
        Self {
            inner: Rc::new(DefaultsInner {
                entries: RefCell::new(IndexMap::new()),
                timezone,
            }),
        }
    }

    /// Offset (`±HH:MM`, empty when unset) handed to every date field.
    #[must_use]
    pub fn timezone(&self) -> &Observable<String> {
        &self.inner.timezone
    }

    /// Register (or replace) a default source.
    pub fn insert(&self, name: impl Into<String>, source: DefaultSource) {
        self.inner.entries.borrow_mut().insert(name.into(), source);
    }

    /// The value default named `name`, created with `initial` if missing.
    pub fn value(&self, name: &str, initial: Option<LiveValue>) -> Observable<Option<LiveValue>> {
        let mut entries = self.inner.entries.borrow_mut();
        if let Some(DefaultSource::Value(existing)) = entries.get(name) {
            return existing.clone();
        }
        let created = Observable::new(initial);
        entries.insert(name.to_string(), DefaultSource::Value(created.clone()));
        created
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<DefaultSource> {
        self.inner.entries.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.borrow().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Defaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Defaults")
            .field("names", &self.inner.entries.borrow().keys().collect::<Vec<_>>())
            .field("timezone", &self.inner.timezone.get())
            .finish()
    }
}

/// Fields of one bind together with the subscriptions feeding them.
struct BoundForm {
    fields: FieldMap,
    scope: BindingScope,
}

impl BoundForm {
    fn live_subscriptions(&self) -> usize {
        let dates: usize = self
            .fields
            .values()
            .filter_map(LiveField::as_date)
            .map(DateSync::binding_count)
            .sum();
        self.scope.binding_count() + dates
    }

    fn dispose(mut self) {
        for date in self.fields.values().filter_map(LiveField::as_date) {
            date.dispose();
        }
        self.scope.clear();
    }
}

/// Live state of one rendered configuration fragment.
pub struct FormContainer {
    id: String,
    config: Rc<ComposeConfig>,
    content: String,
    bound: Option<BoundForm>,
    generation: u64,
}

impl FormContainer {
    #[must_use]
    pub fn new(id: impl Into<String>, config: Rc<ComposeConfig>) -> Self {
        Self {
            id: id.into(),
            config,
            content: String::new(),
            bound: None,
            generation: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the rendered content and its live fields.
    ///
    /// The previous form is disposed first. Empty markup leaves the
    /// container empty. Returns the number of fields created.
    pub fn bind(&mut self, markup: &str, defaults: &Defaults) -> usize {
        self.unbind();
        if markup.trim().is_empty() {
            return 0;
        }

        let _span = tracing::debug_span!(
            "form.bind",
            container = %self.id,
            fields = tracing::field::Empty,
            subscriptions = tracing::field::Empty
        )
        .entered();

        let controls = markup::scan_controls(markup, &self.config.markup);
        let fields = self.build_fields(&controls, defaults);

        let mut scope = BindingScope::new();
        for (name, field) in &fields {
            if let Some(source) = defaults.get(name) {
                source.follow(&mut scope, field.clone());
            }
        }

        let bound = BoundForm { fields, scope };
        tracing::Span::current()
            .record("fields", bound.fields.len())
            .record("subscriptions", bound.live_subscriptions());

        let created = bound.fields.len();
        self.content = markup.to_string();
        self.bound = Some(bound);
        self.generation += 1;
        created
    }

    fn build_fields(&self, controls: &[Control], defaults: &Defaults) -> FieldMap {
        let mut fields = FieldMap::new();

        for control in controls {
            let is_date = matches!(control.kind, ControlKind::DateWidget { .. });
            let value = defaults
                .get(&control.name)
                .and_then(|source| source.initial())
                .or_else(|| control_value(&control.kind));

            match fields.get(&control.name) {
                Some(LiveField::Date(date)) => {
                    if let Some(value) = value {
                        date.local().set(value.to_text());
                    }
                }
                Some(LiveField::Value(field)) if !is_date => {
                    if let Some(value) = value {
                        field.set(value);
                    }
                }
                _ => {
                    let field = if is_date {
                        let date = DateSync::with_picker(
                            defaults.timezone().clone(),
                            &self.config.date_format,
                            DatePicker::new(),
                        );
                        if let Some(value) = value {
                            date.local().set(value.to_text());
                        }
                        LiveField::Date(date)
                    } else {
                        LiveField::Value(Observable::new(
                            value.unwrap_or_else(|| LiveValue::Text(String::new())),
                        ))
                    };
                    fields.insert(control.name.clone(), field);
                }
            }
        }

        fields
    }

    /// Dispose every subscription and clear the content. Idempotent.
    pub fn unbind(&mut self) {
        self.content.clear();
        if let Some(bound) = self.bound.take() {
            tracing::trace!(
                container = %self.id,
                released = bound.live_subscriptions(),
                "form unbound"
            );
            bound.dispose();
        }
    }

    /// Render pass: date widgets become usable and show their value.
    pub fn render(&self) {
        for date in self.dates() {
            date.initialize();
        }
    }

    fn dates(&self) -> impl Iterator<Item = &DateSync> {
        self.bound
            .iter()
            .flat_map(|bound| bound.fields.values())
            .filter_map(LiveField::as_date)
    }

    /// Live fields of the current bind (empty when unbound).
    #[must_use]
    pub fn fields(&self) -> Option<&FieldMap> {
        self.bound.as_ref().map(|bound| &bound.fields)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&LiveField> {
        self.bound.as_ref().and_then(|bound| bound.fields.get(name))
    }

    /// Resolved field values in markup order.
    #[must_use]
    pub fn values(&self) -> Map<String, Value> {
        self.bound
            .iter()
            .flat_map(|bound| bound.fields.iter())
            .map(|(name, field)| (name.clone(), field.resolved()))
            .collect()
    }

    #[must_use]
    pub fn has_validation_errors(&self) -> bool {
        markup::has_validation_errors(&self.content, &self.config.markup)
    }

    /// Subscriptions held by the current bind, date-field internals included.
    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.bound.as_ref().map_or(0, BoundForm::live_subscriptions)
    }

    /// Rendered markup; empty when unbound.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Number of successful non-empty binds so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for FormContainer {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl std::fmt::Debug for FormContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormContainer")
            .field("id", &self.id)
            .field("fields", &self.fields().map_or(0, IndexMap::len))
            .field("subscriptions", &self.live_subscriptions())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Initial value from the control itself. `None` for an unchecked radio,
/// which does not override an earlier member of its group.
fn control_value(kind: &ControlKind) -> Option<LiveValue> {
    match kind {
        ControlKind::Checkbox { checked } => Some(LiveValue::Flag(*checked)),
        ControlKind::Radio { checked: true, value } => Some(LiveValue::Text(value.clone())),
        ControlKind::Radio { checked: false, .. } => None,
        ControlKind::DateWidget { value } => {
            Some(LiveValue::Text(value.clone().unwrap_or_default()))
        }
        ControlKind::Select { value }
        | ControlKind::TextArea { value }
        | ControlKind::Input { value } => Some(LiveValue::Text(value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r#"
        <input type="text" name="namespaces" value="0">
        <input type="checkbox" name="positive_only_sum" checked>
        <div class="datetimepicker" name="start_date" data-value="2013-01-01 00:00:00"></div>
        <select name="aggregation"><option value="sum">Sum</option></select>
    "#;

    fn container() -> FormContainer {
        FormContainer::new("metric-9", Rc::new(ComposeConfig::default()))
    }

    fn text(form: &FormContainer, name: &str) -> LiveValue {
        form.field(name)
            .and_then(LiveField::as_value)
            .map(Observable::get)
            .expect("value field")
    }

    #[test]
    fn bind_resolves_from_markup() {
        let mut form = container();
        let defaults = Defaults::new(Observable::new("+00:00".into()));
        assert_eq!(form.bind(FRAGMENT, &defaults), 4);

        assert_eq!(text(&form, "namespaces"), LiveValue::from("0"));
        assert_eq!(text(&form, "positive_only_sum"), LiveValue::Flag(true));
        assert_eq!(text(&form, "aggregation"), LiveValue::from("sum"));

        let date = form.field("start_date").and_then(LiveField::as_date).expect("date");
        assert_eq!(date.local().get(), "2013-01-01 00:00:00");
        assert_eq!(date.zoned().get(), "2013-01-01 00:00:00");

        let keys: Vec<_> = form.fields().expect("bound").keys().cloned().collect();
        assert_eq!(keys, ["namespaces", "positive_only_sum", "start_date", "aggregation"]);
    }

    #[test]
    fn defaults_take_precedence_and_keep_flowing() {
        let mut form = container();
        let defaults = Defaults::default();
        let namespaces = defaults.value("namespaces", Some("0,1".into()));

        form.bind(FRAGMENT, &defaults);
        assert_eq!(text(&form, "namespaces"), LiveValue::from("0,1"));
        assert_eq!(form.live_subscriptions(), 1 + 3, "one default plus the date internals");

        namespaces.set(Some("4".into()));
        assert_eq!(text(&form, "namespaces"), LiveValue::from("4"));
    }

    #[test]
    fn null_default_falls_through_to_markup() {
        let mut form = container();
        let defaults = Defaults::default();
        let namespaces = defaults.value("namespaces", None);

        form.bind(FRAGMENT, &defaults);
        assert_eq!(text(&form, "namespaces"), LiveValue::from("0"));

        namespaces.set(Some("2".into()));
        assert_eq!(text(&form, "namespaces"), LiveValue::from("2"));
        namespaces.set(None);
        assert_eq!(text(&form, "namespaces"), LiveValue::from("2"), "null is not pushed");
    }

    #[test]
    fn date_default_seeds_local_and_pushes_zoned() {
        let timezone = Observable::new("+02:00".to_string());
        let defaults = Defaults::new(timezone.clone());
        let start = DateSync::new(timezone, "%Y-%m-%d %H:%M:%S");
        start.edit_local("2024-01-01 10:00:00");
        defaults.insert("start_date", DefaultSource::Date(start.clone()));

        let mut form = container();
        form.bind(FRAGMENT, &defaults);
        form.render();
        let date = form.field("start_date").and_then(LiveField::as_date).expect("date").clone();
        assert_eq!(date.local().get(), "2024-01-01 10:00:00");
        assert_eq!(date.zoned().get(), "2024-01-01 08:00:00");

        start.edit_local("2024-02-01 12:00:00");
        assert_eq!(date.zoned().get(), "2024-02-01 10:00:00");
        assert_eq!(date.local().get(), "2024-02-01 12:00:00");
    }

    #[test]
    fn rebind_releases_previous_subscriptions() {
        let defaults = Defaults::default();
        let namespaces = defaults.value("namespaces", Some("1".into()));
        let mut form = container();

        form.bind(FRAGMENT, &defaults);
        let first = form.field("namespaces").cloned().expect("field");
        form.bind(FRAGMENT, &defaults);

        assert_eq!(namespaces.live_subscriber_count(), 1);
        namespaces.set(Some("7".into()));
        assert_eq!(text(&form, "namespaces"), LiveValue::from("7"));
        assert_eq!(
            first.as_value().map(Observable::get),
            Some(LiveValue::from("1")),
            "stale field no longer follows the default"
        );
        assert_eq!(form.generation(), 2);
    }

    #[test]
    fn empty_markup_only_disposes() {
        let defaults = Defaults::default();
        let namespaces = defaults.value("namespaces", Some("1".into()));
        let mut form = container();
        form.bind(FRAGMENT, &defaults);

        assert_eq!(form.bind("", &defaults), 0);
        assert!(!form.is_bound());
        assert_eq!(form.content(), "");
        assert_eq!(form.live_subscriptions(), 0);
        assert_eq!(namespaces.live_subscriber_count(), 0);
        assert!(form.values().is_empty());
    }

    #[test]
    fn drop_detaches_from_shared_timezone() {
        let timezone = Observable::new("+00:00".to_string());
        let defaults = Defaults::new(timezone.clone());
        {
            let mut form = container();
            form.bind(FRAGMENT, &defaults);
            assert_eq!(timezone.live_subscriber_count(), 1);
        }
        assert_eq!(timezone.live_subscriber_count(), 0);
    }

    #[test]
    fn radio_group_takes_checked_member() {
        let markup = r#"
            <input type="radio" name="mode" value="fast">
            <input type="radio" name="mode" value="exact" checked>
            <input type="radio" name="mode" value="slow">
        "#;
        let mut form = container();
        form.bind(markup, &Defaults::default());
        assert_eq!(text(&form, "mode"), LiveValue::from("exact"));
    }

    #[test]
    fn values_use_zoned_dates_and_json_flags() {
        let mut form = container();
        form.bind(FRAGMENT, &Defaults::new(Observable::new("+01:00".into())));
        let values = form.values();
        assert_eq!(values["positive_only_sum"], Value::Bool(true));
        assert_eq!(values["start_date"], Value::String("2012-12-31 23:00:00".into()));
    }

    #[test]
    fn validation_markers_follow_content() {
        let mut form = container();
        form.bind(
            r#"<input name="x" value=""><li class="text-error">Required</li>"#,
            &Defaults::default(),
        );
        assert!(form.has_validation_errors());
        form.unbind();
        assert!(!form.has_validation_errors());
    }
}
