//! Organization domain model
//!
//! An organization is the tenant entity of the console. Each one owns a
//! broker virtual host, recorded here once provisioning has completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrgError, OrgResult};

/// Maximum slug length.
pub const MAX_SLUG_LEN: usize = 64;

/// An organization record.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use console_org::Organization;
///
/// let org = Organization::new(Uuid::new_v4(), "Acme Corp", "acme-corp").unwrap();
/// assert_eq!(org.name, "Acme Corp");
/// assert!(org.is_active);
/// assert!(org.rabbitmq_vhost.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Unique identifier
    pub id: Uuid,

    /// Human-readable name
    pub name: String,

    /// URL-friendly slug, unique across the deployment
    pub slug: String,

    /// Logo URL, empty when unset
    pub logo: String,

    /// Whether the organization is active
    pub is_active: bool,

    /// Number of spaces owned by the organization
    pub total_spaces: i64,

    /// Broker virtual host assigned at provisioning
    pub rabbitmq_vhost: Option<String>,

    /// When broker resources were provisioned
    pub rabbitmq_provisioned_at: Option<DateTime<Utc>>,

    /// When the organization was created
    pub created_at: DateTime<Utc>,

    /// When the organization was last updated
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Creates a new active organization after validating its slug.
    pub fn new(id: Uuid, name: impl Into<String>, slug: impl Into<String>) -> OrgResult<Self> {
        let slug = slug.into();
        validate_slug(&slug)?;

        let now = Utc::now();
        Ok(Self {
            id,
            name: name.into(),
            slug,
            logo: String::new(),
            is_active: true,
            total_spaces: 0,
            rabbitmq_vhost: None,
            rabbitmq_provisioned_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record the broker vhost assigned to this organization.
    pub fn with_vhost(mut self, vhost: impl Into<String>, provisioned_at: DateTime<Utc>) -> Self {
        self.rabbitmq_vhost = Some(vhost.into());
        self.rabbitmq_provisioned_at = Some(provisioned_at);
        self
    }

    /// The assigned vhost, or an empty string before provisioning.
    pub fn vhost_or_empty(&self) -> &str {
        self.rabbitmq_vhost.as_deref().unwrap_or("")
    }
}

/// Validate an organization slug.
///
/// Slugs are 1 to 64 characters of ASCII letters, digits and hyphens.
/// Underscores are rejected with their own error because broker resource
/// names are built by joining the slug with dots.
///
/// # Examples
///
/// ```
/// use console_org::validate_slug;
///
/// assert!(validate_slug("acme-corp").is_ok());
/// assert!(validate_slug("acme_corp").is_err());
/// assert!(validate_slug("").is_err());
/// ```
pub fn validate_slug(slug: &str) -> OrgResult<()> {
    if slug.contains('_') {
        return Err(OrgError::SlugContainsUnderscore(slug.to_string()));
    }

    let valid = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

    if !valid {
        return Err(OrgError::InvalidSlug(slug.to_string()));
    }

    Ok(())
}
