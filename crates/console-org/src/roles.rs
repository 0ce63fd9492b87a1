//! Default organization roles
//!
//! Every organization is created with four roles, each attached to one
//! policy by tag. The policies themselves live in the authorization service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a default organization role.
///
/// # Examples
///
/// ```
/// use console_org::OrganizationRoleType;
///
/// assert_eq!(OrganizationRoleType::Owner.default_policy_tag(), "administrator");
/// assert_eq!(OrganizationRoleType::parse("viewer"), Some(OrganizationRoleType::Viewer));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationRoleType {
    /// Full organization control
    Owner,
    /// Full access to organization resources
    Admin,
    /// Read-only access
    Viewer,
    /// Edit-only access
    Editor,
}

impl OrganizationRoleType {
    /// Every default role, in creation order.
    pub const ALL: [OrganizationRoleType; 4] = [
        OrganizationRoleType::Owner,
        OrganizationRoleType::Admin,
        OrganizationRoleType::Viewer,
        OrganizationRoleType::Editor,
    ];

    /// Role name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationRoleType::Owner => "owner",
            OrganizationRoleType::Admin => "admin",
            OrganizationRoleType::Viewer => "viewer",
            OrganizationRoleType::Editor => "editor",
        }
    }

    /// Tag of the policy a freshly created role of this kind receives.
    pub fn default_policy_tag(&self) -> &'static str {
        match self {
            OrganizationRoleType::Owner => "administrator",
            OrganizationRoleType::Admin => "full-access",
            OrganizationRoleType::Viewer => "read-only",
            OrganizationRoleType::Editor => "edit-only",
        }
    }

    /// Parse a role name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for OrganizationRoleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role belonging to one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationRole {
    /// Unique role ID
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Role kind
    pub role_type: OrganizationRoleType,

    /// Tag of the attached policy
    pub policy_tag: String,

    /// When the role was created
    pub created_at: DateTime<Utc>,
}

impl OrganizationRole {
    /// Create a role of `role_type` attached to its default policy.
    pub fn new(organization_id: Uuid, role_type: OrganizationRoleType) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            role_type,
            policy_tag: role_type.default_policy_tag().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// The default role set for a new organization.
pub fn default_roles(organization_id: Uuid) -> Vec<OrganizationRole> {
    OrganizationRoleType::ALL
        .into_iter()
        .map(|role_type| OrganizationRole::new(organization_id, role_type))
        .collect()
}
