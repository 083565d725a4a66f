//! Configuration for the filing mirror

mod logging;
mod pipeline;
mod registry;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use pipeline::{default_bulk_workers, FilterConfig, PipelineConfig};
pub use registry::{RegistryConfig, USER_AGENT_ENV};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name inside the data directory
pub const CONFIG_FILE_NAME: &str = "filing-mirror.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Category exclusion settings
    #[serde(default)]
    pub filter: FilterConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating, so command-line overrides can
    /// still fill in missing values
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Registry validation
        if self.registry.user_agent.trim().is_empty() {
            errors.push(format!(
                "registry.user_agent must identify the caller (\"Org Name contact@example.com\"); set it in the config file, with --user-agent or {}",
                USER_AGENT_ENV
            ));
        }
        if self.registry.requests_per_second == 0 {
            errors.push("requests_per_second must be positive".to_string());
        }
        if self.registry.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        if self.registry.retry_backoff_base_secs < 1.0 {
            errors.push("retry_backoff_base_secs must be at least 1.0".to_string());
        }
        for (name, value) in [
            ("base_url", &self.registry.base_url),
            ("data_base_url", &self.registry.data_base_url),
            ("bulk_archive_url", &self.registry.bulk_archive_url),
        ] {
            if let Err(e) = url::Url::parse(value) {
                errors.push(format!("registry.{} is not a valid URL ({}): {}", name, e, value));
            }
        }

        // Pipeline validation
        if self.pipeline.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }
        if self.pipeline.bulk_workers == 0 {
            errors.push("bulk_workers must be positive".to_string());
        }
        if self.pipeline.file_chunk_size == 0 {
            errors.push("file_chunk_size must be positive".to_string());
        }
        if self.pipeline.incremental_days == 0 {
            errors.push("incremental_days must be positive".to_string());
        }
        if self.pipeline.network_concurrency == 0 {
            errors.push("network_concurrency must be positive".to_string());
        }
        if self.pipeline.download_concurrency == 0 {
            errors.push("download_concurrency must be positive".to_string());
        }
        if self.pipeline.document_subdir.trim().is_empty() {
            errors.push("document_subdir must not be empty".to_string());
        }
        if self.pipeline.target_forms.is_empty() {
            errors.push("target_forms must name at least one form type".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
