//! Tenant metadata and the provisioning capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TenantResult;

/// The broker's default virtual host. Never holds a tenant.
pub const DEFAULT_VHOST: &str = "/";

/// Connection metadata of a provisioned tenant.
///
/// Immutable once provisioned. Only `vhost` and `amqp_url` come from the
/// broker; the exchange and queue names are derived from the slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    /// Virtual host holding the tenant's resources
    pub vhost: String,

    /// AMQP URL scoped to the tenant's virtual host
    pub amqp_url: String,

    /// Tenant topic exchange
    pub exchange: String,

    /// Queue consumed by the transformer service
    pub transformer_queue: String,

    /// Queue receiving transformed data
    pub transformed_queue: String,
}

impl TenantInfo {
    /// Build tenant metadata for `slug` living in `vhost`.
    ///
    /// # Examples
    ///
    /// ```
    /// use console_tenant::TenantInfo;
    ///
    /// let tenant = TenantInfo::for_slug("acme", "acme", "amqp://broker/acme");
    /// assert_eq!(tenant.exchange, "acme.exchange");
    /// assert_eq!(tenant.transformed_queue, "acme.transformed.data.queue");
    /// ```
    pub fn for_slug(slug: &str, vhost: impl Into<String>, amqp_url: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            amqp_url: amqp_url.into(),
            exchange: Self::exchange_name(slug),
            transformer_queue: Self::transformer_queue_name(slug),
            transformed_queue: Self::transformed_queue_name(slug),
        }
    }

    /// Name of the tenant exchange for `slug`.
    pub fn exchange_name(slug: &str) -> String {
        format!("{}.exchange", slug)
    }

    /// Name of the transformer queue for `slug`.
    pub fn transformer_queue_name(slug: &str) -> String {
        format!("{}.transformer.queue", slug)
    }

    /// Name of the transformed data queue for `slug`.
    pub fn transformed_queue_name(slug: &str) -> String {
        format!("{}.transformed.data.queue", slug)
    }
}

/// Capability to create, delete and probe broker tenants.
///
/// Implementations must make `provision_tenant` idempotent: provisioning a
/// slug that already exists returns the existing tenant.
#[async_trait]
pub trait TenantProvisioner: Send + Sync {
    /// List every virtual host on the broker, including the default one.
    async fn list_vhosts(&self) -> TenantResult<Vec<String>>;

    /// Check whether `exchange` exists inside `vhost`.
    async fn exchange_exists(&self, vhost: &str, exchange: &str) -> TenantResult<bool>;

    /// Create (or look up) the tenant for an organization.
    async fn provision_tenant(&self, org_id: Uuid, slug: &str, port: u16)
        -> TenantResult<TenantInfo>;

    /// Remove the tenant resources and reclaim its virtual host.
    async fn delete_tenant(&self, vhost: &str, slug: &str) -> TenantResult<()>;

    /// AMQP URL a tenant client should use to reach `vhost`.
    fn build_tenant_amqp_url(&self, vhost: &str) -> String;
}

/// Look for an already provisioned tenant for `slug`.
///
/// Scans every non-default virtual host for an exchange named
/// `{slug}.exchange` and returns the first match. Provisioning creates at
/// most one virtual host per slug, so the first match is the only one.
///
/// `None` means either "no tenant" or "broker unreachable"; errors are logged
/// and never returned. Callers re-provision in both cases, which is safe
/// because provisioning is idempotent.
pub async fn tenant_exists<P>(provisioner: &P, slug: &str) -> Option<TenantInfo>
where
    P: TenantProvisioner + ?Sized,
{
    let exchange = TenantInfo::exchange_name(slug);

    let vhosts = match provisioner.list_vhosts().await {
        Ok(vhosts) => vhosts,
        Err(e) => {
            warn!(slug = %slug, error = %e, "Error checking tenant existence");
            return None;
        }
    };

    for vhost in vhosts.iter().filter(|v| v.as_str() != DEFAULT_VHOST) {
        match provisioner.exchange_exists(vhost, &exchange).await {
            Ok(true) => {
                info!(slug = %slug, vhost = %vhost, "Found existing tenant");
                let amqp_url = provisioner.build_tenant_amqp_url(vhost);
                return Some(TenantInfo::for_slug(slug, vhost.clone(), amqp_url));
            }
            Ok(false) => continue,
            Err(e) => {
                warn!(slug = %slug, vhost = %vhost, error = %e, "Error checking tenant existence");
                return None;
            }
        }
    }

    info!(slug = %slug, "Tenant does not exist");
    None
}
