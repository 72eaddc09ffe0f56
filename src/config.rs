//! Configuration management for the Schema Registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (SCHEMA_REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [registry]
//! snapshot_path = "./registry.json"
//! default_compatibility = "BACKWARD"
//! max_write_retries = 8
//!
//! [formats]
//! enabled = ["AVRO", "JSON"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compatibility::CompatibilityMode;
use crate::schema::SchemaFormat;

/// Main configuration for the schema registry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    /// Registry settings
    #[serde(default)]
    pub registry: RegistrySection,

    /// Schema format settings
    #[serde(default)]
    pub formats: FormatsSection,
}

/// Core registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Where the CLI keeps registry state
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Global compatibility mode for a fresh registry
    #[serde(default)]
    pub default_compatibility: CompatibilityMode,

    /// Attempts at a conditional commit before a registration gives up
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
}

/// Schema formats accepted for registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsSection {
    #[serde(default = "default_formats")]
    pub enabled: Vec<SchemaFormat>,
}

// Default value functions
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("registry.json")
}

fn default_max_write_retries() -> u32 {
    8
}

fn default_formats() -> Vec<SchemaFormat> {
    SchemaFormat::ALL.to_vec()
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            default_compatibility: CompatibilityMode::None,
            max_write_retries: default_max_write_retries(),
        }
    }
}

impl Default for FormatsSection {
    fn default() -> Self {
        Self {
            enabled: default_formats(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = [
            "registry.toml",
            ".registry.toml",
            "config/registry.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "schema-registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMA_REGISTRY__*)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the snapshot path (resolves relative paths)
    pub fn snapshot_path(&self) -> PathBuf {
        if self.registry.snapshot_path.is_absolute() {
            self.registry.snapshot_path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.registry.snapshot_path)
        }
    }

    pub fn is_enabled(&self, format: SchemaFormat) -> bool {
        self.formats.enabled.contains(&format)
    }
}
