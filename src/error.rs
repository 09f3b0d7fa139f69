//! Error types for the behavior index engine

use thiserror::Error;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid weight for component {component}: {value}")]
    InvalidWeight { component: String, value: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Live monitor unavailable: {0}")]
    MonitorUnavailable(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by source adapters.
///
/// The harmonizer never propagates these; they are recorded in the
/// per-source report and the column is filled with the neutral value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("Source {0} unavailable: {1}")]
    Unavailable(String, String),

    #[error("Failed to parse source payload: {0}")]
    Parse(String),

    #[error("Source has no data for region {0}")]
    UnknownRegion(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
