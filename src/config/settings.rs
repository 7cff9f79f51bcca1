//! Application settings loaded from config.toml
//!
//! The file has two parts: a `[ledger]` table with the writer's tunables (retry budget,
//! placeholder names, read-side defaults) and a `[[behaviors]]` list describing the
//! built-in catalog seeded into each class. Every ledger field has a default, so an
//! empty or missing file yields a working configuration.

use crate::entities::BehaviorCategory;
use crate::errors::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::{path::Path, time::Duration};
use tracing::{debug, warn};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "POINTS_LEDGER_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Ledger writer and read-side tunables
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Built-in behaviors seeded into new classes
    #[serde(default)]
    pub behaviors: Vec<BehaviorConfig>,
}

/// Tunables for the ledger writer and read layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Attempts per award/undo before a transient failure is returned
    pub max_attempts: u32,
    /// Base backoff between attempts, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Student names that mean "not loaded yet" and must never be recorded
    pub placeholder_names: Vec<String>,
    /// History rows returned when a caller does not pass a limit
    pub default_history_limit: u64,
    /// Size of the top performers list in class statistics
    pub top_performers: usize,
    /// Snapshots buffered per subscription before the feeder waits
    pub subscription_buffer: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 10,
            placeholder_names: vec![
                String::new(),
                "Loading...".to_string(),
                "Loading\u{2026}".to_string(),
                "Unknown".to_string(),
                "Unknown Student".to_string(),
            ],
            default_history_limit: 50,
            top_performers: 5,
            subscription_buffer: 16,
        }
    }
}

impl LedgerSettings {
    /// True when `name` is empty or matches a configured placeholder (trimmed, case-insensitive).
    #[must_use]
    pub fn is_placeholder_name(&self, name: &str) -> bool {
        let trimmed = name.trim();
        trimmed.is_empty()
            || self
                .placeholder_names
                .iter()
                .any(|placeholder| placeholder.trim().eq_ignore_ascii_case(trimmed))
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// The retry budget, never below one attempt.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Configuration for a single built-in behavior
#[derive(Debug, Clone, Deserialize)]
pub struct BehaviorConfig {
    /// Name of the behavior
    pub name: String,
    /// Description shown to teachers
    #[serde(default)]
    pub description: String,
    /// Signed point value
    pub points: i64,
    /// `positive` or `negative`, case-insensitive
    #[serde(deserialize_with = "deserialize_category")]
    pub category: BehaviorCategory,
}

fn deserialize_category<'de, D>(deserializer: D) -> std::result::Result<BehaviorCategory, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Parses configuration from a TOML string.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read or the TOML is invalid.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_config(&contents)
}

/// Loads configuration from `POINTS_LEDGER_CONFIG` or `./config.toml`.
///
/// A missing file is not an error: defaults are used and a warning is logged. A file
/// that exists but cannot be parsed is still an error.
pub fn load_default_config() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
    if !Path::new(&path).exists() {
        warn!("Config file {path} not found, using built-in defaults");
        return Ok(AppConfig::default());
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [ledger]
            max_attempts = 3
            retry_backoff_ms = 25
            placeholder_names = ["Loading...", "TBD"]
            top_performers = 3

            [[behaviors]]
            name = "Participation"
            description = "Contributed to discussion"
            points = 1
            category = "positive"

            [[behaviors]]
            name = "Disruption"
            points = -2
            category = "negative"
        "#;

        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.ledger.max_attempts, 3);
        assert_eq!(config.ledger.retry_backoff_ms, 25);
        assert_eq!(config.ledger.top_performers, 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.ledger.default_history_limit, 50);

        assert_eq!(config.behaviors.len(), 2);
        assert_eq!(config.behaviors[0].name, "Participation");
        assert_eq!(config.behaviors[0].category, BehaviorCategory::Positive);
        assert_eq!(config.behaviors[1].points, -2);
        assert!(config.behaviors[1].description.is_empty());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.ledger.max_attempts, 5);
        assert!(config.behaviors.is_empty());
    }

    #[test]
    fn test_invalid_category_is_config_error() {
        let toml_str = r#"
            [[behaviors]]
            name = "Odd"
            points = 1
            category = "neutral"
        "#;
        let Err(Error::Config { message }) = parse_config(toml_str) else {
            panic!("expected a config error");
        };
        assert!(message.contains("Unknown behavior category 'neutral'"));
    }

    #[test]
    fn test_category_is_case_insensitive() {
        let toml_str = r#"
            [[behaviors]]
            name = "Helping Others"
            points = 2
            category = "Positive"

            [[behaviors]]
            name = "Unprepared"
            points = -1
            category = " NEGATIVE "
        "#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.behaviors[0].category, BehaviorCategory::Positive);
        assert_eq!(config.behaviors[1].category, BehaviorCategory::Negative);
    }

    #[test]
    fn test_placeholder_detection() {
        let settings = LedgerSettings::default();
        assert!(settings.is_placeholder_name(""));
        assert!(settings.is_placeholder_name("   "));
        assert!(settings.is_placeholder_name("Loading..."));
        assert!(settings.is_placeholder_name("loading..."));
        assert!(settings.is_placeholder_name("Loading\u{2026}"));
        assert!(!settings.is_placeholder_name("Ada Lovelace"));
    }

    #[test]
    fn test_retry_delay_grows_linearly() {
        let settings = LedgerSettings {
            retry_backoff_ms: 10,
            ..LedgerSettings::default()
        };
        assert_eq!(settings.retry_delay(1), Duration::from_millis(10));
        assert_eq!(settings.retry_delay(3), Duration::from_millis(30));
    }

    #[test]
    fn test_attempts_never_zero() {
        let settings = LedgerSettings {
            max_attempts: 0,
            ..LedgerSettings::default()
        };
        assert_eq!(settings.attempts(), 1);
    }
}
