//! Error types for the convergence engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Desired state is contradictory or incomplete for the requested mode
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The target service does not exist on the control plane
    #[error("Service '{service}' not found in cluster '{cluster}'")]
    NotFound { cluster: String, service: String },

    /// The control plane rejected an operation
    #[error("{operation} failed: {message}")]
    ApiError {
        operation: &'static str,
        message: String,
    },

    /// The request never produced a usable response
    #[error("{operation} request failed: {source}")]
    TransportError {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A stabilization wait exhausted its attempt budget
    #[error("Timed out waiting for service to become {condition} after {attempts} attempts")]
    WaitTimeout { condition: String, attempts: u32 },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A desired-state file could not be read or parsed
    #[error("Spec file error: {0}")]
    SpecFileError(String),
}

impl Error {
    /// True when the operation may have been accepted by the control plane
    /// but its outcome was never observed. Callers must re-inspect live
    /// state before retrying; everything else failed before taking effect
    /// or was rejected outright.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Error::WaitTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
