//! Builder error types

use infraflow_cloud::CloudError;
use thiserror::Error;

/// Errors raised while declaring AWS components
#[derive(Error, Debug)]
pub enum AwsError {
    /// A required argument is absent or empty
    #[error("{0} must be provided")]
    Missing(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Invalid CIDR block {cidr}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("CIDR space exhausted: {0}")]
    CidrExhausted(String),

    #[error("Overlapping CIDR blocks: {0}")]
    CidrOverlap(String),

    #[error("{requested} availability zones requested but only {available} available")]
    InsufficientZones { requested: usize, available: usize },

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

impl AwsError {
    pub fn missing(field: impl Into<String>) -> Self {
        AwsError::Missing(field.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AwsError::InvalidArgument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, AwsError>;
