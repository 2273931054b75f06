//! Configuration management for the bridge tool.
//!
//! This module handles loading, validation, and conversion of the bridge
//! configuration from TOML files and command-line overrides.

use bridge_core::{ClientConfig, CoreConfig, PermissionPolicy, RemoteConfig, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// Every section is optional in the file; missing sections and fields fall
/// back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control interface endpoint and credentials
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Identity store location
    #[serde(default)]
    pub store: StoreConfig,
    /// Timeouts, retries and deduplication
    #[serde(default)]
    pub client: ClientConfig,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Which caller roles may perform which actions
    #[serde(default)]
    pub policy: PermissionPolicy,
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to the core configuration.
    pub fn to_core_config(&self) -> CoreConfig {
        CoreConfig {
            remote: self.remote.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        self.to_core_config().validate()?;

        if !self.remote.address.contains(':') {
            return Err(format!(
                "Invalid remote address: {} (expected HOST:PORT)",
                &self.remote.address
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.policy.superuser_roles.is_empty() {
            return Err("policy.superuser_roles cannot be empty".to_string());
        }

        Ok(())
    }
}
