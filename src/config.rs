//! Configuration Module
//!
//! Handles loading cache settings from environment variables or from a host
//! application's own settings tree.

use std::env;

use serde::Deserialize;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serialize concurrent async acquisitions of the same key
    pub single_flight: bool,
    /// Log a statistics summary when a request scope ends
    pub log_scope_summary: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SINGLE_FLIGHT` - Coalesce concurrent acquisitions (default: false)
    /// - `CACHE_LOG_SCOPE_SUMMARY` - Log stats when a scope ends (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            single_flight: env_flag("CACHE_SINGLE_FLIGHT").unwrap_or(defaults.single_flight),
            log_scope_summary: env_flag("CACHE_LOG_SCOPE_SUMMARY")
                .unwrap_or(defaults.log_scope_summary),
        }
    }

    /// Returns a copy with single-flight acquisition switched on or off.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            single_flight: false,
            log_scope_summary: true,
        }
    }
}

/// Parses a boolean flag, accepting `1/0`, `true/false`, `yes/no` and `on/off`.
fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.single_flight);
        assert!(config.log_scope_summary);
    }

    #[test]
    fn test_config_from_env() {
        // Both variables are only touched by this test
        env::remove_var("CACHE_SINGLE_FLIGHT");
        env::set_var("CACHE_LOG_SCOPE_SUMMARY", "garbage");

        let config = Config::from_env();
        assert_eq!(config, Config::default());

        env::set_var("CACHE_SINGLE_FLIGHT", "yes");
        env::set_var("CACHE_LOG_SCOPE_SUMMARY", "0");

        let config = Config::from_env();
        assert!(config.single_flight);
        assert!(!config.log_scope_summary);

        env::remove_var("CACHE_SINGLE_FLIGHT");
        env::remove_var("CACHE_LOG_SCOPE_SUMMARY");
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: Config = serde_json::from_str(r#"{"single_flight": true}"#).unwrap();
        assert!(config.single_flight);
        assert!(config.log_scope_summary);
    }

    #[test]
    fn test_with_single_flight() {
        assert!(Config::default().with_single_flight(true).single_flight);
    }
}
