//! # Console Organization Records
//!
//! Organization state for the console backend, as seen by the tenant
//! bootstrap and discovery components.
//!
//! ## Overview
//!
//! The console-org crate handles:
//! - **Organizations**: Tenant entities with their broker vhost assignment
//! - **Roles**: The default role set created with every organization
//! - **Memberships**: Owner assignment to the owner role
//! - **Store**: The data-store boundary used by the bootstrap and discovery paths
//!
//! ## Architecture
//!
//! ```text
//! Organization (slug unique)
//!   ├─ rabbitmq_vhost ─→ broker tenant
//!   └─ OrganizationRole × 4 (owner, admin, viewer, editor)
//!         └─ OrganizationMembership (owner account)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use console_org::{MemoryOrganizationStore, Organization, OrganizationStore};
//! use uuid::Uuid;
//!
//! async fn create() -> Result<(), console_org::OrgError> {
//!     let store = MemoryOrganizationStore::new();
//!     let org = Organization::new(Uuid::new_v4(), "Acme Corp", "acme")?;
//!     store.create_with_owner(org, "owner@acme.io").await?;
//!
//!     let found = store.find_by_slug("acme").await?;
//!     assert!(found.is_some());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod membership;
pub mod organization;
pub mod roles;
pub mod store;

pub use error::{OrgError, OrgResult};
pub use membership::OrganizationMembership;
pub use organization::{validate_slug, Organization, MAX_SLUG_LEN};
pub use roles::{default_roles, OrganizationRole, OrganizationRoleType};
pub use store::{MemoryOrganizationStore, OrganizationStore, SpaceAction};
