//! Bootstrap errors.

use console_events::EventsError;
use console_org::OrgError;
use console_tenant::TenantError;
use thiserror::Error;

/// Errors that abort an organization bootstrap.
///
/// Event and task delivery failures are not errors; they are reported in
/// the outcome instead.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Missing or invalid input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Organization store failure or invalid organization data
    #[error(transparent)]
    Organization(#[from] OrgError),

    /// Tenant provisioning or deprovisioning failed
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Building an event payload failed
    #[error(transparent)]
    Events(#[from] EventsError),
}

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;
