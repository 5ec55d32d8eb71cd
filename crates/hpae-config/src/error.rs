//! Error types for configuration loading and conversion.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or converting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error without a known path
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Unknown sample format string
    #[error("unknown sample format '{0}'")]
    UnknownFormat(String),

    /// Unknown enumerated value
    #[error("unknown {kind} '{value}'")]
    UnknownValue {
        /// What was being parsed.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A module is unusable as written
    #[error("invalid module '{name}': {reason}")]
    InvalidModule {
        /// Name of the module.
        name: String,
        /// Description of the problem.
        reason: String,
    },

    /// Two modules share a name
    #[error("duplicate module name: {0}")]
    DuplicateModule(String),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid module error.
    pub fn invalid_module(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidModule {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown value error.
    pub fn unknown_value(kind: &'static str, value: impl Into<String>) -> Self {
        ConfigError::UnknownValue {
            kind,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    // --- factory methods ---

    #[test]
    fn read_file_factory_produces_correct_variant() {
        let err = ConfigError::read_file("/etc/hpae.toml", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/etc/hpae.toml"))
        );
    }

    #[test]
    fn invalid_module_factory_produces_correct_variant() {
        let err = ConfigError::invalid_module("Speaker", "channels is 0");
        assert!(matches!(err, ConfigError::InvalidModule { ref name, .. } if name == "Speaker"));
    }

    // --- Display formatting ---

    #[test]
    fn read_file_display() {
        let err = ConfigError::read_file("/a/b.toml", mock_io_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to read file"), "got: {msg}");
        assert!(msg.contains("/a/b.toml"), "got: {msg}");
    }

    #[test]
    fn invalid_module_display() {
        let err = ConfigError::invalid_module("mic", "rate is 0");
        assert_eq!(err.to_string(), "invalid module 'mic': rate is 0");
    }

    #[test]
    fn unknown_value_display() {
        let err = ConfigError::unknown_value("source type", "laser");
        assert_eq!(err.to_string(), "unknown source type 'laser'");
    }

    #[test]
    fn duplicate_display() {
        let err = ConfigError::DuplicateModule("Speaker".into());
        assert_eq!(err.to_string(), "duplicate module name: Speaker");
    }

    // --- Error::source() chain ---

    #[test]
    fn io_variants_expose_source() {
        assert!(ConfigError::read_file("/x", mock_io_err()).source().is_some());
        assert!(ConfigError::write_file("/x", mock_io_err()).source().is_some());
        assert!(ConfigError::from(mock_io_err()).source().is_some());
    }

    #[test]
    fn plain_variants_have_no_source() {
        assert!(ConfigError::UnknownFormat("x".into()).source().is_none());
        assert!(ConfigError::DuplicateModule("x".into()).source().is_none());
    }
}
