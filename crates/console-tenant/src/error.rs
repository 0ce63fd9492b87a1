//! Tenant provisioning errors.

use thiserror::Error;

/// Errors raised by a [`TenantProvisioner`](crate::TenantProvisioner).
#[derive(Debug, Error)]
pub enum TenantError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Management API returned an error response.
    #[error("Management API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Management API rejected the configured credentials.
    #[error("Management API authentication failed")]
    AuthenticationFailed,

    /// Response body could not be decoded.
    #[error("Invalid management API response: {0}")]
    InvalidResponse(String),

    /// A configured URL could not be parsed or extended.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The provisioning backend could not be reached.
    #[error("Provisioning backend unavailable: {0}")]
    Unavailable(String),
}

impl TenantError {
    /// Whether this error means the backend was unreachable rather than
    /// answering with a refusal.
    pub fn is_connectivity(&self) -> bool {
        match self {
            TenantError::RequestFailed(e) => e.is_connect() || e.is_timeout(),
            TenantError::Unavailable(_) => true,
            _ => false,
        }
    }
}

/// Result type for tenant operations.
pub type TenantResult<T> = Result<T, TenantError>;
