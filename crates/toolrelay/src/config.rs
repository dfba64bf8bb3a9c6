use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};

pub const CONFIG_PATH_ENV: &str = "TOOLRELAY_CONFIG";
pub const BIND_ENV: &str = "TOOLRELAY_BIND";
pub const PORT_ENV: &str = "TOOLRELAY_PORT";
pub const EXECUTION_TIMEOUT_ENV: &str = "TOOLRELAY_EXECUTION_TIMEOUT_MS";
pub const HISTORY_CAPACITY_ENV: &str = "TOOLRELAY_HISTORY_CAPACITY";
pub const CLEANUP_INTERVAL_ENV: &str = "TOOLRELAY_CLEANUP_INTERVAL_MS";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;

/// Process-wide settings, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    pub execution_timeout_ms: u64,
    pub history_capacity: usize,
    pub cleanup_interval_ms: u64,
    pub server_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            execution_timeout_ms: DEFAULT_EXECUTION_TIMEOUT_MS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            server_name: "toolrelay".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load from the optional JSON file named by `TOOLRELAY_CONFIG`, then apply
    /// environment overrides and validate.
    pub fn load() -> RelayResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            RelayError::Config(format!("failed to read {}: {error}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|error| {
            RelayError::Config(format!("failed to parse {}: {error}", path.display()))
        })
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> RelayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(BIND_ENV) {
            self.bind = bind;
        }
        if let Some(raw) = lookup(PORT_ENV) {
            self.port = parse_var(PORT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(EXECUTION_TIMEOUT_ENV) {
            self.execution_timeout_ms = parse_var(EXECUTION_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = lookup(HISTORY_CAPACITY_ENV) {
            self.history_capacity = parse_var(HISTORY_CAPACITY_ENV, &raw)?;
        }
        if let Some(raw) = lookup(CLEANUP_INTERVAL_ENV) {
            self.cleanup_interval_ms = parse_var(CLEANUP_INTERVAL_ENV, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.execution_timeout_ms == 0 {
            return Err(RelayError::Config(
                "execution_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(RelayError::Config(
                "history_capacity must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(RelayError::Config(
                "cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> RelayResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|error| RelayError::Config(format!("{key}={raw:?} is invalid: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.execution_timeout_ms, 30_000);
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.execution_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_replace_fields() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (PORT_ENV, "8080"),
                (EXECUTION_TIMEOUT_ENV, " 250 "),
                (HISTORY_CAPACITY_ENV, "5"),
                (BIND_ENV, "0.0.0.0"),
            ]))
            .expect("overrides");
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.execution_timeout_ms, 250);
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.cleanup_interval_ms, DEFAULT_CLEANUP_INTERVAL_MS);
    }

    #[test]
    fn invalid_override_is_config_error() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[(EXECUTION_TIMEOUT_ENV, "soon")]))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(ref msg) if msg.contains(EXECUTION_TIMEOUT_ENV)));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let config = RelayConfig {
            execution_timeout_ms: 0,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("toolrelay.json");
        std::fs::write(&path, r#"{ "port": 4100, "execution_timeout_ms": 500 }"#).expect("write");

        let config = RelayConfig::from_file(&path).expect("load");
        assert_eq!(config.port, 4100);
        assert_eq!(config.execution_timeout_ms, 500);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.server_name, "toolrelay");
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempdir().expect("tempdir");
        let err = RelayConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
