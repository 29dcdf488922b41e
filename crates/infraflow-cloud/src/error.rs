//! Cloud layer error types

use thiserror::Error;

/// Errors raised by the resource graph, the state store and providers
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Unresolved output: {urn}.{attribute}")]
    UnresolvedOutput { urn: String, attribute: String },

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Inventory lookup failed: {0}")]
    Inventory(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
