//! Engine configuration.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | LAB_DB_PATH | lab-billing.db | SQLite database file |
//! | LAB_LOG_FILTER | lab_billing_core=info | `tracing` filter directive |
//! | LAB_REJECT_OVERPAYMENT | false | Reject payments above the net amount |
//! | LAB_BUSY_TIMEOUT_MS | 5000 | Wait for the write lock, in milliseconds |

use std::time::Duration;

use crate::billing::BillingOptions;
use crate::db::{Database, DbResult};

pub const DEFAULT_DB_PATH: &str = "lab-billing.db";
pub const DEFAULT_LOG_FILTER: &str = "lab_billing_core=info";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Database file path
    pub db_path: String,
    /// Log filter, e.g. `lab_billing_core=debug`
    pub log_filter: String,
    /// Reject writes that leave paid above net
    pub reject_overpayment: bool,
    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.into(),
            log_filter: DEFAULT_LOG_FILTER.into(),
            reject_overpayment: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            db_path: lookup("LAB_DB_PATH").unwrap_or(defaults.db_path),
            log_filter: lookup("LAB_LOG_FILTER").unwrap_or(defaults.log_filter),
            reject_overpayment: lookup("LAB_REJECT_OVERPAYMENT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.reject_overpayment),
            busy_timeout_ms: lookup("LAB_BUSY_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.busy_timeout_ms),
        }
    }

    /// Filter to install: `requested` when non-empty, else the configured one.
    pub fn log_filter_for(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(self.log_filter.as_str())
            .to_string()
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn billing_options(&self) -> BillingOptions {
        BillingOptions {
            reject_overpayment: self.reject_overpayment,
        }
    }

    /// Open the configured database.
    pub fn open_database(&self) -> DbResult<Database> {
        Database::open_with_timeout(&self.db_path, self.busy_timeout())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.db_path, "lab-billing.db");
        assert!(!config.reject_overpayment);
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LAB_DB_PATH", "/tmp/lab.db"),
            ("LAB_LOG_FILTER", "lab_billing_core=debug"),
            ("LAB_REJECT_OVERPAYMENT", "TRUE"),
            ("LAB_BUSY_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.db_path, "/tmp/lab.db");
        assert_eq!(config.log_filter, "lab_billing_core=debug");
        assert!(config.reject_overpayment);
        assert!(config.billing_options().reject_overpayment);
        assert_eq!(config.busy_timeout_ms, 250);
    }

    #[test]
    fn test_unparseable_values_use_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LAB_REJECT_OVERPAYMENT", "maybe"),
            ("LAB_BUSY_TIMEOUT_MS", "soon"),
        ]));
        assert!(!config.reject_overpayment);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_log_filter_resolution() {
        let config = EngineConfig::from_lookup(lookup(&[("LAB_LOG_FILTER", "lab_billing_core=trace")]));
        assert_eq!(config.log_filter_for(None), "lab_billing_core=trace");
        assert_eq!(config.log_filter_for(Some("  ")), "lab_billing_core=trace");
        assert_eq!(config.log_filter_for(Some("warn")), "warn");

        let defaults = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(defaults.log_filter_for(None), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_open_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            db_path: dir.path().join("lab.db").to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        let db = config.open_database().unwrap();
        assert!(db.list_test_definitions(false).unwrap().is_empty());
    }
}
