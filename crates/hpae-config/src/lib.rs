//! Engine configuration for HPAE.
//!
//! An engine config is a TOML file with one `[engine]` table and any number
//! of `[[sink]]` and `[[source]]` module tables:
//!
//! ```toml
//! [engine]
//! pa_close_after_ms = 4000
//!
//! [[sink]]
//! name = "Speaker"
//! class_name = "file_io"
//! file_name = "out.wav"
//! rate = 48000
//! channels = 2
//! format = "s16le"
//! buffer_size = 3840
//! ```
//!
//! # Example
//!
//! ```rust
//! use hpae_config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str(r#"
//!     [[sink]]
//!     name = "Speaker"
//!     class_name = "null"
//!     rate = 48000
//!     channels = 2
//!     format = "s16le"
//!     buffer_size = 3840
//! "#).unwrap();
//!
//! let sink = config.sink("Speaker").unwrap().to_sink_info().unwrap();
//! assert_eq!(sink.frame_len, 960);
//! ```

mod engine;
mod error;
mod module;

pub use engine::EngineSettings;
pub use error::ConfigError;
pub use module::{ModuleInfo, ModuleRole, parse_ec_type, parse_format, parse_source_type};

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Parsed engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine-wide settings.
    pub engine: EngineSettings,
    /// Render ports.
    pub sink: Vec<ModuleInfo>,
    /// Capture ports.
    pub source: Vec<ModuleInfo>,
}

impl EngineConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sinks = config.sink.len(),
            sources = config.source.len(),
            "loaded engine config"
        );
        Ok(config)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(toml_str)?;
        config.assign_roles();
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file, creating the parent directory if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::write_file(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    fn assign_roles(&mut self) {
        for module in &mut self.sink {
            module.role = ModuleRole::Sink;
        }
        for module in &mut self.source {
            module.role = ModuleRole::Source;
        }
    }

    /// Check every module converts and that names are unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for module in self.sink.iter().chain(&self.source) {
            if module.name.is_empty() {
                return Err(ConfigError::invalid_module("", "name is empty"));
            }
            if !names.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }
        for module in &self.sink {
            module.to_sink_info()?;
        }
        for module in &self.source {
            module.to_source_info()?;
        }
        if self.engine.frame_ms == 0 {
            return Err(ConfigError::invalid_module("engine", "frame_ms is 0"));
        }
        if self.engine.queue_depth == 0 {
            return Err(ConfigError::invalid_module("engine", "queue_depth is 0"));
        }
        Ok(())
    }

    /// Sink module by name.
    pub fn sink(&self, name: &str) -> Option<&ModuleInfo> {
        self.sink.iter().find(|m| m.name == name)
    }

    /// Source module by name.
    pub fn source(&self, name: &str) -> Option<&ModuleInfo> {
        self.source.iter().find(|m| m.name == name)
    }

    /// All modules, sinks first, in declaration order.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.sink.iter().chain(&self.source)
    }
}
