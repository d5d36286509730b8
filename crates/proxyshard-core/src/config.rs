//! Capacity limits and run settings.
//!
//! Limits are read once, validated, and then passed by value into the
//! unifier and the sharder; nothing below this module reads configuration
//! on its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ShardError, ShardResult};

pub const DEFAULT_PROXIES_PER_ENV: i64 = 50;
pub const DEFAULT_UNITS_PER_ENV: i64 = 60;
pub const DEFAULT_PROXY_ENDPOINT_COUNT: i64 = 5;
pub const DEFAULT_MAX_PROXY_ENDPOINT_LIMIT: i64 = 20;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_BACKOFF: u32 = 2;

// ---------------------------------------------------------------------------
// ShardingConfig
// ---------------------------------------------------------------------------

/// Validated capacity limits for splitting and sharding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Maximum proxies per environment slot.
    pub per_env_proxy_limit: usize,
    /// Maximum proxies plus shared flows per environment slot.
    pub total_units_per_env: usize,
    /// Proxies with more endpoints than this are split.
    pub endpoint_split_threshold: usize,
    /// Upper bound accepted for `endpoint_split_threshold`.
    pub max_endpoint_limit: usize,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            per_env_proxy_limit: DEFAULT_PROXIES_PER_ENV as usize,
            total_units_per_env: DEFAULT_UNITS_PER_ENV as usize,
            endpoint_split_threshold: DEFAULT_PROXY_ENDPOINT_COUNT as usize,
            max_endpoint_limit: DEFAULT_MAX_PROXY_ENDPOINT_LIMIT as usize,
        }
    }
}

impl ShardingConfig {
    pub fn validate(&self) -> ShardResult<()> {
        if self.per_env_proxy_limit == 0 {
            return Err(ShardError::Config(
                "proxies per environment limit must be greater than zero".into(),
            ));
        }
        if self.total_units_per_env == 0 {
            return Err(ShardError::Config(
                "proxies and shared flows per environment limit must be greater than zero".into(),
            ));
        }
        if self.endpoint_split_threshold == 0 {
            return Err(ShardError::Config(
                "proxy endpoint count must be greater than zero".into(),
            ));
        }
        if self.endpoint_split_threshold > self.max_endpoint_limit {
            return Err(ShardError::Config(format!(
                "proxy endpoint count {} exceeds the maximum of {}",
                self.endpoint_split_threshold, self.max_endpoint_limit
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    pub no_of_proxies_per_env_limits: i64,
    pub no_of_proxies_and_shared_flows_per_env_limits: i64,
    pub max_proxy_endpoint_limit: i64,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            no_of_proxies_per_env_limits: DEFAULT_PROXIES_PER_ENV,
            no_of_proxies_and_shared_flows_per_env_limits: DEFAULT_UNITS_PER_ENV,
            max_proxy_endpoint_limit: DEFAULT_MAX_PROXY_ENDPOINT_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UnifierSettings {
    pub proxy_endpoint_count: i64,
    pub unifier_output_dir: PathBuf,
    pub source_unzipped_apis: PathBuf,
}

impl Default for UnifierSettings {
    fn default() -> Self {
        Self {
            proxy_endpoint_count: DEFAULT_PROXY_ENDPOINT_COUNT,
            unifier_output_dir: PathBuf::from("unifier_output"),
            source_unzipped_apis: PathBuf::from("apis_unzipped"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl PipelineSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub export_dir: PathBuf,
    pub report_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("export"),
            report_file: PathBuf::from("report.json"),
        }
    }
}

/// Everything a run needs, as read from the settings file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub inputs: InputLimits,
    pub unifier: UnifierSettings,
    pub pipeline: PipelineSettings,
    pub paths: PathSettings,
}

fn to_limit(value: i64, what: &str) -> ShardResult<usize> {
    usize::try_from(value)
        .map_err(|_| ShardError::Config(format!("{what} must not be negative (got {value})")))
}

fn env_override<T: std::str::FromStr>(key: &str) -> ShardResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ShardError::Config(format!("{key} should be a number (got {raw:?})"))),
        Err(_) => Ok(None),
    }
}

impl Settings {
    pub fn from_toml(source: &str) -> ShardResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Load settings from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> ShardResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ShardError::Config(format!("cannot read settings {}: {e}", path.display()))
        })?;
        let mut settings = Self::from_toml(&source)?;
        settings.apply_env_overrides()?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> ShardResult<()> {
        if let Some(v) = env_override::<i64>("PROXYSHARD_PROXIES_PER_ENV")? {
            self.inputs.no_of_proxies_per_env_limits = v;
        }
        if let Some(v) = env_override::<i64>("PROXYSHARD_UNITS_PER_ENV")? {
            self.inputs.no_of_proxies_and_shared_flows_per_env_limits = v;
        }
        if let Some(v) = env_override::<i64>("PROXYSHARD_PROXY_ENDPOINT_COUNT")? {
            self.unifier.proxy_endpoint_count = v;
        }
        if let Some(v) = env_override::<usize>("PROXYSHARD_WORKERS")? {
            self.pipeline.workers = v;
        }
        Ok(())
    }

    /// Validated capacity limits.
    pub fn sharding(&self) -> ShardResult<ShardingConfig> {
        let config = ShardingConfig {
            per_env_proxy_limit: to_limit(
                self.inputs.no_of_proxies_per_env_limits,
                "proxies per environment limit",
            )?,
            total_units_per_env: to_limit(
                self.inputs.no_of_proxies_and_shared_flows_per_env_limits,
                "proxies and shared flows per environment limit",
            )?,
            endpoint_split_threshold: to_limit(
                self.unifier.proxy_endpoint_count,
                "proxy endpoint count",
            )?,
            max_endpoint_limit: to_limit(
                self.inputs.max_proxy_endpoint_limit,
                "maximum proxy endpoint limit",
            )?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Settings::default().sharding().unwrap();
        assert_eq!(config, ShardingConfig::default());
    }

    #[test]
    fn test_parse_settings_file() {
        let settings = Settings::from_toml(
            r#"
            [inputs]
            no_of_proxies_per_env_limits = 2
            no_of_proxies_and_shared_flows_per_env_limits = 3
            max_proxy_endpoint_limit = 10

            [unifier]
            proxy_endpoint_count = 4
            unifier_output_dir = "out"

            [pipeline]
            workers = 2
            "#,
        )
        .unwrap();
        let config = settings.sharding().unwrap();
        assert_eq!(config.per_env_proxy_limit, 2);
        assert_eq!(config.total_units_per_env, 3);
        assert_eq!(config.endpoint_split_threshold, 4);
        assert_eq!(config.max_endpoint_limit, 10);
        assert_eq!(settings.pipeline.workers, 2);
        assert_eq!(settings.pipeline.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.unifier.unifier_output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_negative_endpoint_count_is_config_error() {
        let mut settings = Settings::default();
        settings.unifier.proxy_endpoint_count = -1;
        assert!(matches!(settings.sharding(), Err(ShardError::Config(_))));
    }

    #[test]
    fn test_zero_endpoint_count_is_config_error() {
        let mut settings = Settings::default();
        settings.unifier.proxy_endpoint_count = 0;
        assert!(matches!(settings.sharding(), Err(ShardError::Config(_))));
    }

    #[test]
    fn test_endpoint_count_over_maximum_is_config_error() {
        let config = ShardingConfig {
            endpoint_split_threshold: 21,
            max_endpoint_limit: 20,
            ..ShardingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ShardError::Config(_))));
    }

    #[test]
    fn test_zero_proxy_limit_is_config_error() {
        let config = ShardingConfig {
            per_env_proxy_limit: 0,
            ..ShardingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_rejected() {
        assert!(matches!(
            Settings::from_toml("[inputs]\nno_of_proxies_per_env_limits = \"many\""),
            Err(ShardError::Toml(_))
        ));
    }
}
