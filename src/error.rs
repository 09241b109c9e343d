//! Error types for automail.

use std::path::PathBuf;

/// Top-level error type for campaign operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Campaign log error: {0}")]
    Log(#[from] LogError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Configuration-related errors. Always fatal, raised before any side effect.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Template rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Included file not found: {path}")]
    IncludeNotFound { path: PathBuf },

    #[error("Failed to read included file {path}: {source}")]
    IncludeRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cyclic inclusion of {path}")]
    CyclicInclusion { path: PathBuf },

    #[error("Inclusion nested deeper than {limit} levels at {path}")]
    TooDeep { path: PathBuf, limit: usize },
}

/// Campaign log persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("Log file {path} could not be parsed: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to serialize campaign log: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Addressee directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Failed to read addressee source {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Addressee source {path} could not be parsed: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("No directory entry for {name}")]
    UnknownName { name: String },

    #[error("Record has no '{attribute}' attribute")]
    MissingAttribute { attribute: String },
}

/// Transport collaborator failures. The reason is a plain diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("Reply fetch failed: {reason}")]
    Fetch { reason: String },
}

/// Result type alias for automail.
pub type Result<T> = std::result::Result<T, Error>;
