//! Configuration parsing for bridge applications.
//!
//! A single JSON file describes how to reach the native runtime, which system
//! properties to mirror into it, and how the executor pump runs.
//!
//! # Example config
//!
//! ```json
//! {
//!   "bridge": { "module_name": "mdb", "log_path": "/tmp/log", "log_json": false },
//!   "runtime": { "library_path": "/opt/feed/libfeed.so" },
//!   "system_properties": { "feed.address": "demo.example.com:7300" },
//!   "executor": { "pump_interval_ms": 10, "cpu_affinity": 3 }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::BridgeError;

/// Default executor pump interval in milliseconds.
pub const DEFAULT_PUMP_INTERVAL_MS: u64 = 10;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub bridge: Option<ModuleMeta>,

    /// Where the native runtime comes from.
    pub runtime: RuntimeConfig,

    /// Properties written into the native system property store at startup.
    /// Ordered so startup logs are stable.
    #[serde(default)]
    pub system_properties: BTreeMap<String, String>,

    /// Executor pump settings. No pump runs when absent.
    pub executor: Option<ExecutorConfig>,
}

/// Module metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    pub log_json: Option<bool>,
}

/// Native runtime location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the native shared library.
    pub library_path: Option<PathBuf>,
    /// Use the in-process loopback runtime instead of a shared library.
    #[serde(default)]
    pub loopback: bool,
}

/// Executor pump configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Interval between drains in milliseconds.
    pub pump_interval_ms: Option<u64>,
    /// CPU core for the pump thread.
    pub cpu_affinity: Option<i32>,
}

impl ExecutorConfig {
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.unwrap_or(DEFAULT_PUMP_INTERVAL_MS))
    }
}

impl AppConfig {
    /// Module name used for log file prefixes.
    pub fn module_name(&self) -> String {
        self.bridge
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "mdb".to_string())
    }

    /// Log directory, if file logging is configured.
    pub fn log_path(&self) -> Option<String> {
        self.bridge.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn log_json(&self) -> bool {
        self.bridge
            .as_ref()
            .and_then(|m| m.log_json)
            .unwrap_or(false)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !self.runtime.loopback && self.runtime.library_path.is_none() {
            return Err(BridgeError::Config(
                "runtime needs either `library_path` or `loopback: true`".into(),
            ));
        }
        let bad_key = self
            .system_properties
            .keys()
            .find(|k| k.is_empty() || k.contains('\0'));
        if let Some(key) = bad_key {
            return Err(BridgeError::Config(format!(
                "invalid system property key {key:?}"
            )));
        }
        let zero_interval = self
            .executor
            .as_ref()
            .is_some_and(|e| e.pump_interval_ms == Some(0));
        if zero_interval {
            return Err(BridgeError::Config(
                "executor.pump_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a config from JSON text. Call [`AppConfig::validate`] once any
/// overrides are applied.
pub fn parse_config(json: &str) -> anyhow::Result<AppConfig> {
    Ok(serde_json::from_str(json)?)
}

/// Read and parse a JSON config file without validating it.
pub fn read_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_valid(json: &str) -> anyhow::Result<AppConfig> {
        let config = parse_config(json)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn full_config() {
        let cfg = parse_valid(
            r#"{
                "bridge": { "module_name": "feed_bridge", "log_path": "/tmp/log" },
                "runtime": { "library_path": "/opt/feed/libfeed.so" },
                "system_properties": { "key_1": "value_1", "key_2": "value_2" },
                "executor": { "pump_interval_ms": 5, "cpu_affinity": 2 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.module_name(), "feed_bridge");
        assert_eq!(cfg.log_path().as_deref(), Some("/tmp/log"));
        assert!(!cfg.log_json());
        assert_eq!(cfg.system_properties.len(), 2);
        let exec = cfg.executor.unwrap();
        assert_eq!(exec.pump_interval(), Duration::from_millis(5));
        assert_eq!(exec.cpu_affinity, Some(2));
    }

    #[test]
    fn minimal_loopback_config() {
        let cfg = parse_valid(r#"{ "runtime": { "loopback": true } }"#).unwrap();
        assert_eq!(cfg.module_name(), "mdb");
        assert!(cfg.system_properties.is_empty());
        assert!(cfg.executor.is_none());
    }

    #[test]
    fn runtime_without_source_is_rejected() {
        let err = parse_valid(r#"{ "runtime": {} }"#).unwrap_err();
        assert!(err.to_string().contains("library_path"));
    }

    #[test]
    fn override_before_validation() {
        let mut cfg = parse_config(r#"{ "runtime": {} }"#).unwrap();
        assert!(cfg.validate().is_err());
        cfg.runtime.loopback = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn read_config_reports_path() {
        let path = std::env::temp_dir().join("mdb-config-missing.json");
        let err = read_config(&path).unwrap_err();
        assert!(err.to_string().contains("mdb-config-missing.json"));
    }

    #[test]
    fn zero_pump_interval_is_rejected() {
        let json = r#"{ "runtime": { "loopback": true }, "executor": { "pump_interval_ms": 0 } }"#;
        assert!(parse_valid(json).is_err());
    }

    #[test]
    fn invalid_property_key_is_rejected() {
        let json = r#"{ "runtime": { "loopback": true }, "system_properties": { "": "x" } }"#;
        assert!(parse_valid(json).is_err());
    }

    #[test]
    fn default_pump_interval() {
        let exec = ExecutorConfig {
            pump_interval_ms: None,
            cpu_affinity: None,
        };
        assert_eq!(
            exec.pump_interval(),
            Duration::from_millis(DEFAULT_PUMP_INTERVAL_MS)
        );
    }
}
