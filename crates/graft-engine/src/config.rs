//! Patch configuration (graft.toml)
//!
//! ```toml
//! [output]
//! path = "build/patched.grafts"
//!
//! [markers]
//! add-field = "AddField"
//!
//! [[wiring]]
//! main = "Game.Pawn"
//! target = "Core.Component"
//! initializer = "Game.Pawn:PostInit"
//! getter = "GetComp"
//! ```

use crate::index::split_qualified;
use crate::patch::{DefaultPostInitProvider, MarkerKeys, Patcher, WiringRegistration};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid entry
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Patch configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchConfig {
    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Marker key overrides
    #[serde(default)]
    pub markers: MarkerKeys,

    /// Post-init wirings
    #[serde(default)]
    pub wiring: Vec<WiringConfig>,
}

/// `[output]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Artifact path
    pub path: Option<PathBuf>,
}

/// One `[[wiring]]` entry, served by the default post-init provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WiringConfig {
    /// Main type name
    pub main: String,
    /// Component type name
    pub target: String,
    /// Initializer (`Type:Method`, or a method name on `main`)
    pub initializer: String,
    /// Component getter (`Type:Method`, or a method name on the field's
    /// declaring type or its bases)
    pub getter: String,
}

impl PatchConfig {
    /// Load a configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let keys = [
            ("add-field", &self.markers.add_field),
            ("direct", &self.markers.direct),
            ("injector", &self.markers.injector),
            ("post-init", &self.markers.post_init),
            ("free-patch", &self.markers.free_patch),
        ];
        for (name, key) in keys {
            if key.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "marker key '{}' cannot be empty",
                    name
                )));
            }
        }

        for (i, wiring) in self.wiring.iter().enumerate() {
            for (field, value) in [
                ("main", &wiring.main),
                ("target", &wiring.target),
                ("initializer", &wiring.initializer),
                ("getter", &wiring.getter),
            ] {
                if value.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "wiring #{} has an empty '{}'",
                        i + 1,
                        field
                    )));
                }
            }
            if wiring.initializer.contains(':') && split_qualified(&wiring.initializer).is_none() {
                return Err(ConfigError::Validation(format!(
                    "wiring #{} initializer '{}' is not a valid Type:Method name",
                    i + 1,
                    wiring.initializer
                )));
            }
        }
        Ok(())
    }

    /// Wiring registrations for every configured entry
    pub fn wirings(&self) -> Vec<WiringRegistration> {
        self.wiring
            .iter()
            .map(|w| WiringRegistration {
                main: w.main.clone(),
                target: w.target.clone(),
                initializer: w.initializer.clone(),
                provider: Arc::new(DefaultPostInitProvider::new(w.getter.clone())),
            })
            .collect()
    }

    /// Register the configured wirings on a patcher
    pub fn apply_to(&self, patcher: &mut Patcher) {
        for wiring in self.wirings() {
            patcher.register_wiring(wiring);
        }
    }
}
