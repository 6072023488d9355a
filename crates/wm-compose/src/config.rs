#![forbid(unsafe_code)]

//! Composer configuration.
//!
//! Every tunable the composer reads lives in [`ComposeConfig`], loadable
//! from TOML or JSON. Missing keys take their defaults, so an empty file is
//! a valid configuration.
//!
//! ```toml
//! tab_id_prefix = "metric-"
//! default_timezone = "+00:00"
//!
//! [markup]
//! date_widget_class = "datetimepicker"
//! validation_marker_class = "text-error"
//! ```

use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::timezone::parse_offset;

/// Message shown for transport failures.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Wikimetrics is experiencing problems.  \
Visit the Support page for help if this persists.  You can also check the console for details.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Prepended to every response slot id: `<prefix><metric>-for-<cohort>`.
    pub tab_id_prefix: String,

    /// `chrono` format of local and zoned timestamps.
    pub date_format: String,

    /// Offset applied to date fields until the user picks a timezone.
    /// Empty means "no timezone yet".
    pub default_timezone: String,

    /// Text of the generic transport-failure notice.
    pub failure_message: String,

    pub markup: MarkupConfig,
}

/// Class names the markup scanner looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupConfig {
    /// Container element that hosts a date picker.
    pub date_widget_class: String,
    /// `<li>` class marking an inline validation error.
    pub validation_marker_class: String,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            tab_id_prefix: "metric-".to_string(),
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            default_timezone: "+00:00".to_string(),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
            markup: MarkupConfig::default(),
        }
    }
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            date_widget_class: "datetimepicker".to_string(),
            validation_marker_class: "text-error".to_string(),
        }
    }
}

impl ComposeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check every field. An empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tab_id_prefix.is_empty() {
            errors.push("tab_id_prefix must not be empty".to_string());
        } else if self.tab_id_prefix.chars().any(char::is_whitespace) {
            errors.push(format!(
                "tab_id_prefix '{}' must not contain whitespace",
                self.tab_id_prefix
            ));
        }

        let sample = chrono::NaiveDate::from_ymd_opt(2013, 6, 1)
            .and_then(|d| d.and_hms_opt(13, 45, 30));
        if let Some(sample) = sample {
            let rendered = sample.format(&self.date_format).to_string();
            match NaiveDateTime::parse_from_str(&rendered, &self.date_format) {
                Ok(parsed) if parsed == sample => {}
                _ => errors.push(format!(
                    "date_format '{}' does not round-trip a full timestamp",
                    self.date_format
                )),
            }
        }

        if !self.default_timezone.is_empty() && parse_offset(&self.default_timezone).is_err() {
            errors.push(format!(
                "default_timezone '{}' is not a ±HH:MM offset",
                self.default_timezone
            ));
        }

        if self.markup.date_widget_class.trim().is_empty() {
            errors.push("markup.date_widget_class must not be empty".to_string());
        }
        if self.markup.validation_marker_class.trim().is_empty() {
            errors.push("markup.validation_marker_class must not be empty".to_string());
        }

        errors
    }

    /// Validate and return `self`, or every problem found.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Errors that can occur when loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Json(serde_json::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => write!(f, "validation errors: {}", errors.join("; ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Toml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
