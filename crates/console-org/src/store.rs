//! Organization store boundary
//!
//! The relational store lives outside this workspace; [`OrganizationStore`]
//! is the slice of it the bootstrap and discovery components need.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrgError, OrgResult};
use crate::membership::OrganizationMembership;
use crate::organization::Organization;
use crate::roles::{default_roles, OrganizationRole, OrganizationRoleType};

/// Direction of a space counter adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceAction {
    /// A space was added
    Add,
    /// A space was removed
    Remove,
}

impl SpaceAction {
    /// Counter delta for this action.
    pub fn delta(&self) -> i64 {
        match self {
            SpaceAction::Add => 1,
            SpaceAction::Remove => -1,
        }
    }
}

/// Data-store operations on organizations.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// The earliest created organization, if any.
    async fn first(&self) -> OrgResult<Option<Organization>>;

    /// Look up an organization by slug.
    async fn find_by_slug(&self, slug: &str) -> OrgResult<Option<Organization>>;

    /// Persist a new organization together with its default roles and
    /// attach `owner_email` to the owner role.
    async fn create_with_owner(&self, organization: Organization, owner_email: &str)
        -> OrgResult<Organization>;

    /// Delete an organization and everything attached to it.
    async fn delete(&self, id: Uuid) -> OrgResult<()>;

    /// Apply a space counter adjustment and return the new total.
    ///
    /// The total never drops below 1 after an adjustment.
    async fn adjust_total_spaces(&self, slug: &str, action: SpaceAction) -> OrgResult<i64>;

    /// Roles of an organization.
    async fn roles(&self, organization_id: Uuid) -> OrgResult<Vec<OrganizationRole>>;

    /// Memberships of an organization.
    async fn members(&self, organization_id: Uuid) -> OrgResult<Vec<OrganizationMembership>>;
}

#[derive(Debug, Default)]
struct StoreState {
    /// Organizations in creation order
    organizations: Vec<Organization>,
    roles: Vec<OrganizationRole>,
    memberships: Vec<OrganizationMembership>,
}

/// In-memory [`OrganizationStore`].
///
/// Used by tests and by deployments that keep organization state elsewhere
/// and only need the bootstrap flow.
#[derive(Debug, Clone, Default)]
pub struct MemoryOrganizationStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryOrganizationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored organizations.
    pub async fn len(&self) -> usize {
        self.state.read().await.organizations.len()
    }

    /// Whether the store holds no organizations.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrganizationStore for MemoryOrganizationStore {
    async fn first(&self) -> OrgResult<Option<Organization>> {
        Ok(self.state.read().await.organizations.first().cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> OrgResult<Option<Organization>> {
        let state = self.state.read().await;
        Ok(state.organizations.iter().find(|o| o.slug == slug).cloned())
    }

    async fn create_with_owner(
        &self,
        organization: Organization,
        owner_email: &str,
    ) -> OrgResult<Organization> {
        let mut state = self.state.write().await;

        if state.organizations.iter().any(|o| o.slug == organization.slug) {
            return Err(OrgError::DuplicateSlug(organization.slug));
        }

        let roles = default_roles(organization.id);
        let owner_role = roles
            .iter()
            .find(|r| r.role_type == OrganizationRoleType::Owner)
            .map(|r| r.id)
            .ok_or_else(|| OrgError::Storage("owner role missing from default roles".to_string()))?;

        state.memberships.push(OrganizationMembership::new(
            organization.id,
            owner_role,
            owner_email,
        ));
        state.roles.extend(roles);
        state.organizations.push(organization.clone());

        debug!(slug = %organization.slug, "Stored organization");
        Ok(organization)
    }

    async fn delete(&self, id: Uuid) -> OrgResult<()> {
        let mut state = self.state.write().await;

        let before = state.organizations.len();
        state.organizations.retain(|o| o.id != id);
        if state.organizations.len() == before {
            return Err(OrgError::NotFound(id.to_string()));
        }

        state.roles.retain(|r| r.organization_id != id);
        state.memberships.retain(|m| m.organization_id != id);
        Ok(())
    }

    async fn adjust_total_spaces(&self, slug: &str, action: SpaceAction) -> OrgResult<i64> {
        let mut state = self.state.write().await;

        let org = state
            .organizations
            .iter_mut()
            .find(|o| o.slug == slug)
            .ok_or_else(|| OrgError::NotFound(slug.to_string()))?;

        org.total_spaces = (org.total_spaces + action.delta()).max(1);
        org.updated_at = Utc::now();
        Ok(org.total_spaces)
    }

    async fn roles(&self, organization_id: Uuid) -> OrgResult<Vec<OrganizationRole>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn members(&self, organization_id: Uuid) -> OrgResult<Vec<OrganizationMembership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(slug: &str) -> Organization {
        Organization::new(Uuid::new_v4(), slug.to_uppercase(), slug).unwrap()
    }

    #[tokio::test]
    async fn test_create_with_owner() {
        let store = MemoryOrganizationStore::new();
        let created = store.create_with_owner(org("acme"), "owner@acme.io").await.unwrap();

        let roles = store.roles(created.id).await.unwrap();
        assert_eq!(roles.len(), 4);

        let members = store.members(created.id).await.unwrap();
        assert_eq!(members.len(), 1);
        let owner_role = roles
            .iter()
            .find(|r| r.role_type == OrganizationRoleType::Owner)
            .unwrap();
        assert_eq!(members[0].role_id, owner_role.id);
        assert_eq!(members[0].email, "owner@acme.io");
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let store = MemoryOrganizationStore::new();
        store.create_with_owner(org("acme"), "a@acme.io").await.unwrap();

        let err = store.create_with_owner(org("acme"), "b@acme.io").await.unwrap_err();
        assert!(matches!(err, OrgError::DuplicateSlug(_)));
    }

    #[tokio::test]
    async fn test_first_is_earliest() {
        let store = MemoryOrganizationStore::new();
        store.create_with_owner(org("first"), "a@x.io").await.unwrap();
        store.create_with_owner(org("second"), "b@x.io").await.unwrap();

        assert_eq!(store.first().await.unwrap().unwrap().slug, "first");
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryOrganizationStore::new();
        let created = store.create_with_owner(org("acme"), "a@acme.io").await.unwrap();

        store.delete(created.id).await.unwrap();
        assert!(store.is_empty().await);
        assert!(store.roles(created.id).await.unwrap().is_empty());
        assert!(store.members(created.id).await.unwrap().is_empty());

        assert!(matches!(store.delete(created.id).await, Err(OrgError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_space_counter_floor() {
        let store = MemoryOrganizationStore::new();
        store.create_with_owner(org("acme"), "a@acme.io").await.unwrap();

        assert_eq!(store.adjust_total_spaces("acme", SpaceAction::Add).await.unwrap(), 1);
        assert_eq!(store.adjust_total_spaces("acme", SpaceAction::Add).await.unwrap(), 2);
        assert_eq!(store.adjust_total_spaces("acme", SpaceAction::Remove).await.unwrap(), 1);
        assert_eq!(store.adjust_total_spaces("acme", SpaceAction::Remove).await.unwrap(), 1);

        assert!(matches!(
            store.adjust_total_spaces("missing", SpaceAction::Add).await,
            Err(OrgError::NotFound(_))
        ));
    }
}
