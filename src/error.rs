//! Error types for the drop box service

use std::time::Duration;

use thiserror::Error;

use crate::guard::{OperationClass, Rejection};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the drop box service
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Caller-visible outcomes
    // =========================================================================
    /// Item absent or expired. Both cases share one signal.
    #[error("Item not found")]
    NotFound,

    /// Rate limit window ceiling exceeded
    #[error("Rate limit exceeded for {class} operations, retry after {}s", retry_after.as_secs())]
    RateLimited {
        class: OperationClass,
        retry_after: Duration,
    },

    /// Client identity is in the blocked set
    #[error("Client is blocked")]
    Blocked,

    /// Content or file metadata failed validation
    #[error("Validation rejected: {0}")]
    ValidationRejected(Rejection),

    /// Request body larger than the accepted maximum
    #[error("Request body exceeds {max} bytes")]
    PayloadTooLarge { max: u64 },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Generated identifier was already present at insert time
    #[error("Identifier collision on insert: {0}")]
    IdCollision(String),

    /// TTL outside the representable or allowed range
    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    /// Blob storage collaborator failure
    #[error("Blob storage error: {0}")]
    Blob(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file parse error
    #[error("Failed to parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// HTTP server error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for outcomes caused by the caller rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound
                | Error::RateLimited { .. }
                | Error::Blocked
                | Error::ValidationRejected(_)
                | Error::PayloadTooLarge { .. }
                | Error::InvalidTtl(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
