//! Error types for the resolution engine

use hostfacts_util::HostfactsError;
use thiserror::Error;

/// Errors that escape the resolution engine
///
/// Execution failures and timeouts never show up here; they are reported
/// to the diagnostic sink and the value resolves to nothing.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Invalid(#[from] HostfactsError),

    #[error("Flush hook {index} of resolution '{resolution}' failed: {source}")]
    FlushHookFailed {
        resolution: String,
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::Invalid(HostfactsError::invalid_argument(msg))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
