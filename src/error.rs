//! Error taxonomy for the resource mapping engine
//!
//! Client faults (`ModelMismatch`, `PatchViolation`, `WriteCapability`) are
//! detected before either the cache or a store is mutated. Endpoint faults
//! abort the in-flight call without rolling back writes already issued to
//! other endpoints.

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug, Clone)]
pub enum CraftsError {
    /// Unknown resource kind, unknown label or malformed identifier/value
    #[error("Model mismatch: {0}")]
    ModelMismatch(String),

    /// Non-success HTTP status from a backing store
    #[error("HTTP error of the endpoint \"{endpoint}\" - code: {status} - {message}")]
    Endpoint {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Illegal patch operation against the current resource shape
    #[error("{message} at patch[{index}]")]
    PatchViolation { index: usize, message: String },

    /// Write attempted through an endpoint without update support
    #[error("Updating \"{label}\" requires SPARQL Update support at endpoint {endpoint}")]
    WriteCapability { label: String, endpoint: String },

    /// The API configuration failed load-time validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No API registered under this id
    #[error("API not found: \"{0}\" is not registered")]
    ApiNotFound(String),

    /// The request never produced an HTTP status (connection, TLS, timeout)
    #[error("Transport error at endpoint \"{endpoint}\": {message}")]
    Transport { endpoint: String, message: String },

    /// Query template rendering failed
    #[error("Template error: {0}")]
    Template(String),

    /// The store answered with something that is not a SPARQL JSON result
    #[error("Malformed response from endpoint \"{endpoint}\": {message}")]
    MalformedResponse { endpoint: String, message: String },

    /// Internal consistency violation (e.g. embedding depth overflow)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CraftsError {
    /// Whether the caller is at fault
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            CraftsError::ModelMismatch(_)
                | CraftsError::PatchViolation { .. }
                | CraftsError::WriteCapability { .. }
        )
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        CraftsError::ModelMismatch(message.into())
    }

    pub(crate) fn patch(index: usize, message: impl Into<String>) -> Self {
        CraftsError::PatchViolation {
            index,
            message: message.into(),
        }
    }
}

pub type CraftsResult<T> = Result<T, CraftsError>;
