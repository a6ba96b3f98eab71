//! Typed errors for pack loading and validation.
//!
//! These never cross the engine boundary: the loader turns them into
//! human-readable strings and excludes the offending pack.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Pack file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("TOML parsing error in {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unsupported pack format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("Validation error in {origin}: {message}")]
    Invalid { origin: String, message: String },

    #[error("No valid explanations found in {0}")]
    NoRules(String),
}
