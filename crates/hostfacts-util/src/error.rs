//! Error types for hostfacts

use thiserror::Error;

/// Shared error type for hostfacts operations
#[derive(Debug, Error)]
pub enum HostfactsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl HostfactsError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, HostfactsError>;
