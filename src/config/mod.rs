//! Configuration module for tus-uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use crate::extension::ChecksumExtension;
use crate::store::DEFAULT_PREFIX;
use lazy_static::lazy_static;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("environment variable pattern is valid");
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub checksum: ChecksumConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.address cannot be empty".into(),
            ));
        }

        let base_path = &self.server.base_path;
        if !base_path.starts_with('/') || !base_path.ends_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "server.base_path '{}' must start and end with '/'",
                base_path
            )));
        }

        if let Some(ref public_url) = self.server.public_url {
            if !is_valid_http_url(public_url) {
                return Err(ConfigError::ValidationError(
                    "Invalid server.public_url: must start with http:// or https://".into(),
                ));
            }
        }

        if self.server.chunk_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "server.chunk_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.storage.directory.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.directory cannot be empty".into(),
            ));
        }

        if self.metadata.backend == MetadataBackend::File && self.metadata.directory.is_none() {
            return Err(ConfigError::ValidationError(
                "metadata.directory is required for the file backend".into(),
            ));
        }

        if self.checksum.enabled {
            if let Some(ref algorithms) = self.checksum.algorithms {
                ChecksumExtension::with_algorithms(algorithms.as_slice())
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// URI prefix of the upload endpoint
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Scheme and host used to build `Location`; the request `Host` otherwise
    #[serde(default)]
    pub public_url: Option<String>,
    /// Largest accepted `Final-Length`, advertised as `Tus-Max-Size`
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Serialize PATCH requests per upload id
    #[serde(default = "default_exclusive_patch")]
    pub exclusive_patch: bool,
    /// Sync every written chunk to disk before recording its offset
    #[serde(default)]
    pub sync_writes: bool,
}

impl ServerConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

fn default_base_path() -> String {
    "/files/".to_string()
}

fn default_chunk_timeout_secs() -> u64 {
    30
}

fn default_exclusive_patch() -> bool {
    true
}

/// Blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub directory: PathBuf,
}

/// Metadata store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    Memory,
    File,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub backend: MetadataBackend,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::default(),
            prefix: default_prefix(),
            directory: None,
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Checksum extension configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumConfig {
    #[serde(default = "default_checksum_enabled")]
    pub enabled: bool,
    /// Restricts the advertised algorithm set; all compiled-in ones otherwise
    #[serde(default)]
    pub algorithms: Option<Vec<String>>,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            enabled: default_checksum_enabled(),
            algorithms: None,
        }
    }
}

fn default_checksum_enabled() -> bool {
    true
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
