//! Error taxonomy for the reqtrace core
//!
//! Nothing here is fatal to the process: the worst outcome of any core
//! failure is that one project, document or node could not be loaded or
//! changed, reported up for the front end to display.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::Invalid;

/// Errors surfaced by the core library
#[derive(Debug, Error)]
pub enum Error {
    /// A persisted record failed strict validation
    #[error("Malformed record {}: {source}", path.display())]
    MalformedRecord {
        path: PathBuf,
        #[source]
        source: Invalid,
    },

    /// A child, parent or trace ID points at a record that cannot be loaded
    #[error("Dangling reference to #{0}")]
    DanglingReference(u64),

    /// The requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The project ID space has no free identifiers left
    #[error("ID space exhausted")]
    ExhaustedIdSpace,

    /// A legacy document could not be converted to the current layout
    #[error("Legacy document '{document}' could not be converted: {reason}")]
    LegacyConversion { document: String, reason: String },

    /// Another process holds the project lock
    #[error("Timeout waiting for project lock: {}", .0.display())]
    Locked(PathBuf),

    /// A requested change is not allowed in the current state
    #[error("Refused: {0}")]
    Refused(String),

    /// Registry file problems
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
