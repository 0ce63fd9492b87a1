//! Membership domain model
//!
//! Links an account to one organization role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account holding a role in an organization.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use console_org::OrganizationMembership;
///
/// let membership = OrganizationMembership::new(Uuid::new_v4(), Uuid::new_v4(), "owner@acme.io");
/// assert_eq!(membership.email, "owner@acme.io");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationMembership {
    /// Unique membership ID
    pub id: Uuid,

    /// Organization ID
    pub organization_id: Uuid,

    /// Role held by the account
    pub role_id: Uuid,

    /// Account email
    pub email: String,

    /// When the membership was created
    pub joined_at: DateTime<Utc>,
}

impl OrganizationMembership {
    /// Creates a membership for `email` in the given role.
    pub fn new(organization_id: Uuid, role_id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            role_id,
            email: email.into(),
            joined_at: Utc::now(),
        }
    }
}
