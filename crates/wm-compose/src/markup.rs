#![forbid(unsafe_code)]

//! Scanner for fetched configuration fragments.
//!
//! Fragments are server-rendered HTML that need not be well-formed, so the
//! scanner does not build a tree. It walks opening tags in document order
//! and reports the named editable controls it finds, plus whether any
//! inline validation marker is present.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex_lite::Regex;

use crate::config::MarkupConfig;

/// What kind of editable control a tag is, with its rendered state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    Checkbox { checked: bool },
    Radio { checked: bool, value: String },
    /// Date-picker container; `value` is its `data-value` sentinel.
    DateWidget { value: Option<String> },
    Select { value: String },
    TextArea { value: String },
    Input { value: String },
}

/// A named control found in a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub name: String,
    pub kind: ControlKind,
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(input|select|textarea|div|li)\b([^>]*)>").expect("tag pattern")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)",
            r#"(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#,
        ))
        .expect("attribute pattern")
    })
}

fn option_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<option\b([^>]*)>(.*?)(?:</option>|<option\b|$)")
            .expect("option pattern")
    })
}

/// Attributes of one tag, names lowercased. Valueless attributes map to "".
fn parse_attributes(raw: &str) -> IndexMap<String, String> {
    let raw = raw.trim_end_matches('/');
    attr_regex()
        .captures_iter(raw)
        .map(|caps| {
            let name = caps[1].to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

fn has_class(attrs: &IndexMap<String, String>, class: &str) -> bool {
    attrs
        .get("class")
        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

/// Decode the handful of entities server-side templates emit in values.
#[must_use]
pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Inner text from `from` up to the closing `</tag>`, or to the end.
fn inner_until_close<'a>(markup: &'a str, lowered: &str, from: usize, tag: &str) -> &'a str {
    let close = format!("</{tag}");
    match lowered[from..].find(&close) {
        Some(rel) => &markup[from..from + rel],
        None => &markup[from..],
    }
}

fn selected_option(options_markup: &str) -> String {
    let mut first = None;
    for caps in option_regex().captures_iter(options_markup) {
        let attrs = parse_attributes(&caps[1]);
        let value = match attrs.get("value") {
            Some(v) => v.clone(),
            None => decode_entities(caps[2].trim()),
        };
        if attrs.contains_key("selected") {
            return value;
        }
        first.get_or_insert(value);
    }
    first.unwrap_or_default()
}

/// Every named control in `markup`, in document order.
#[must_use]
pub fn scan_controls(markup: &str, config: &MarkupConfig) -> Vec<Control> {
    let lowered = markup.to_ascii_lowercase();
    let mut controls = Vec::new();

    for caps in tag_regex().captures_iter(markup) {
        let tag = caps[1].to_ascii_lowercase();
        let attrs = parse_attributes(&caps[2]);
        let Some(name) = attrs.get("name").filter(|n| !n.is_empty()).cloned() else {
            continue;
        };
        let end = caps.get(0).map_or(0, |m| m.end());

        let kind = match tag.as_str() {
            "div" if has_class(&attrs, &config.date_widget_class) => ControlKind::DateWidget {
                value: attrs.get("data-value").cloned(),
            },
            "div" | "li" => continue,
            "select" => ControlKind::Select {
                value: selected_option(inner_until_close(markup, &lowered, end, "select")),
            },
            "textarea" => ControlKind::TextArea {
                value: decode_entities(inner_until_close(markup, &lowered, end, "textarea")),
            },
            _ => {
                let input_type = attrs
                    .get("type")
                    .map(|t| t.to_ascii_lowercase())
                    .unwrap_or_default();
                let checked = attrs.contains_key("checked");
                let value = attrs.get("value").cloned().unwrap_or_default();
                match input_type.as_str() {
                    "checkbox" => ControlKind::Checkbox { checked },
                    "radio" => ControlKind::Radio { checked, value },
                    _ => ControlKind::Input { value },
                }
            }
        };

        controls.push(Control { name, kind });
    }

    controls
}

/// `true` if the fragment carries at least one inline validation marker.
#[must_use]
pub fn has_validation_errors(markup: &str, config: &MarkupConfig) -> bool {
    tag_regex().captures_iter(markup).any(|caps| {
        caps[1].eq_ignore_ascii_case("li")
            && has_class(&parse_attributes(&caps[2]), &config.validation_marker_class)
    })
}
