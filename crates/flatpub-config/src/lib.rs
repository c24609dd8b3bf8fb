//! flatpub configuration
//!
//! Locates and loads the YAML configuration that controls how a Flatpak
//! filesystem export is turned into an OCI image and published to local
//! container storage.

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable holding a direct path to the config file
pub const CONFIG_ENV: &str = "FLATPUB_CONFIG";

const CANDIDATES: [&str; 3] = ["flatpub.local.yaml", "flatpub.yaml", ".flatpub.yaml"];

/// Where Flatpak metadata is recorded in the generated OCI image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatpakMetadata {
    #[default]
    Annotations,
    Labels,
    Both,
}

impl fmt::Display for FlatpakMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlatpakMetadata::Annotations => write!(f, "annotations"),
            FlatpakMetadata::Labels => write!(f, "labels"),
            FlatpakMetadata::Both => write!(f, "both"),
        }
    }
}

/// External program that assembles the Flatpak OCI image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BuilderCommand {
    fn default() -> Self {
        Self {
            program: "flatpak-module".to_string(),
            args: Vec::new(),
        }
    }
}

/// Retry policy applied to external tool invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatpubConfig {
    /// containers/image transport used as the copy destination
    pub storage_transport: String,
    pub flatpak_metadata: FlatpakMetadata,
    /// Path inside the exported filesystem holding the Flatpak build tree
    pub extraction_path: String,
    /// skopeo executable
    pub skopeo: String,
    pub builder: BuilderCommand,
    pub retry: RetrySettings,
}

impl Default for FlatpubConfig {
    fn default() -> Self {
        Self {
            storage_transport: "containers-storage".to_string(),
            flatpak_metadata: FlatpakMetadata::default(),
            extraction_path: "var/tmp/flatpak-build".to_string(),
            skopeo: "skopeo".to_string(),
            builder: BuilderCommand::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl FlatpubConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config: FlatpubConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the discovered config file, falling back to defaults when none exists
    pub fn load_or_default() -> Result<Self> {
        match find_config_file()? {
            Some(path) => Self::load(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_transport.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage_transport must not be empty".to_string(),
            ));
        }
        if self.extraction_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "extraction_path must be relative to the filesystem root: {}",
                self.extraction_path
            )));
        }
        if self.builder.program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "builder.program must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Find the flatpub config file
///
/// Search order:
/// 1. `FLATPUB_CONFIG` environment variable (direct path)
/// 2. Current directory: flatpub.local.yaml, flatpub.yaml, .flatpub.yaml
/// 3. `./.flatpub/` directory, same order
/// 4. `~/.config/flatpub/config.yaml`
///
/// Returns `Ok(None)` when nothing is found.
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::NotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let local_dir = current_dir.join(".flatpub");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(Some(path));
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("flatpub").join("config.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
