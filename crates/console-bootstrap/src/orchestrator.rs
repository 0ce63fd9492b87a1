//! Organization bootstrap sequencing
//!
//! Creating an organization provisions (or reuses) its broker tenant,
//! persists the record, then announces it with an `org.created` event and a
//! `new_organization` task. Deleting runs the reverse: announce first, then
//! tear down the tenant and the record.
//!
//! Event and task delivery are best-effort. Their results are reported in
//! the outcome, but a failure never rolls back or blocks the organization
//! change itself.

use chrono::Utc;
use console_events::{EventPublisher, EventType, OrgCreatedPayload, OrgDeletedPayload};
use console_org::{Organization, OrganizationStore, SpaceAction};
use console_tenant::{tenant_exists, TenantInfo, TenantProvisioner};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::DEFAULT_TENANT_PORT;
use crate::error::{BootstrapError, BootstrapResult};
use crate::tasks::{TaskSender, DELETE_ORGANIZATION_TASK, NEW_ORGANIZATION_TASK};

/// Input of [`BootstrapOrchestrator::init_organization`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitRequest {
    pub org_name: String,
    pub org_slug: String,
    pub owner_email: String,
}

impl InitRequest {
    /// Build a request.
    pub fn new(
        org_name: impl Into<String>,
        org_slug: impl Into<String>,
        owner_email: impl Into<String>,
    ) -> Self {
        Self {
            org_name: org_name.into(),
            org_slug: org_slug.into(),
            owner_email: owner_email.into(),
        }
    }

    fn validate(&self) -> BootstrapResult<()> {
        if self.org_name.trim().is_empty() {
            return Err(BootstrapError::InvalidRequest("organization name is required".into()));
        }
        if self.org_slug.trim().is_empty() {
            return Err(BootstrapError::InvalidRequest("organization slug is required".into()));
        }
        if !self.owner_email.contains('@') {
            return Err(BootstrapError::InvalidRequest(format!(
                "invalid owner email '{}'",
                self.owner_email
            )));
        }
        Ok(())
    }
}

/// An organization removed by [`BootstrapOrchestrator::delete_organization`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedOrganization {
    pub organization: Organization,
    pub event_published: bool,
    pub task_sent: bool,
}

/// An organization created by [`BootstrapOrchestrator::init_organization`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedOrganization {
    pub organization: Organization,
    pub tenant: TenantInfo,
    /// The tenant already existed on the broker
    pub tenant_reused: bool,
    pub event_published: bool,
    pub task_sent: bool,
    /// Organization deleted first because its slug differed
    pub replaced: Option<DeletedOrganization>,
}

/// Result of [`BootstrapOrchestrator::init_organization`].
#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// A new organization was created
    Created(CreatedOrganization),
    /// An organization with the requested slug exists; nothing changed
    AlreadyExists(Organization),
}

/// Coordinates the provisioner, the store, the publisher and the task sender.
pub struct BootstrapOrchestrator {
    store: Arc<dyn OrganizationStore>,
    provisioner: Arc<dyn TenantProvisioner>,
    publisher: EventPublisher,
    tasks: Arc<dyn TaskSender>,
    tenant_port: u16,
}

impl BootstrapOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        store: Arc<dyn OrganizationStore>,
        provisioner: Arc<dyn TenantProvisioner>,
        publisher: EventPublisher,
        tasks: Arc<dyn TaskSender>,
    ) -> Self {
        Self {
            store,
            provisioner,
            publisher,
            tasks,
            tenant_port: DEFAULT_TENANT_PORT,
        }
    }

    /// Override the port recorded on provisioned tenants.
    pub fn with_tenant_port(mut self, port: u16) -> Self {
        self.tenant_port = port;
        self
    }

    /// Make sure this deployment's organization exists with the requested
    /// slug.
    ///
    /// An existing organization with a different slug is deleted first. An
    /// existing organization with the same slug is left untouched.
    #[instrument(skip(self, request), fields(slug = %request.org_slug))]
    pub async fn init_organization(&self, request: &InitRequest) -> BootstrapResult<InitOutcome> {
        request.validate()?;

        let mut replaced = None;
        if let Some(existing) = self.store.first().await? {
            if existing.slug == request.org_slug {
                warn!("Organization already exists, skipping creation");
                return Ok(InitOutcome::AlreadyExists(existing));
            }

            warn!(
                previous = %existing.slug,
                "Organization slug changed, deleting previous organization"
            );
            replaced = Some(self.delete_organization(&existing).await?);
        }

        let org_id = Uuid::new_v4();
        let organization = Organization::new(org_id, &request.org_name, &request.org_slug)?;

        let (tenant, tenant_reused) =
            match tenant_exists(self.provisioner.as_ref(), &request.org_slug).await {
                Some(tenant) => {
                    warn!(vhost = %tenant.vhost, "Tenant already provisioned, reusing");
                    (tenant, true)
                }
                None => {
                    info!("Provisioning tenant");
                    let tenant = self
                        .provisioner
                        .provision_tenant(org_id, &request.org_slug, self.tenant_port)
                        .await?;
                    (tenant, false)
                }
            };

        let organization = self
            .store
            .create_with_owner(
                organization.with_vhost(&tenant.vhost, Utc::now()),
                &request.owner_email,
            )
            .await?;
        info!(org_id = %organization.id, owner = %request.owner_email, "Created organization");

        let payload = OrgCreatedPayload::new(&organization, &tenant).to_payload()?;
        let event_published = self
            .publisher
            .publish_org_event(EventType::OrgCreated, payload)
            .await;
        if !event_published {
            warn!("org.created not delivered, continuing");
        }

        let task_sent = self
            .tasks
            .send_task(
                NEW_ORGANIZATION_TASK,
                new_organization_kwargs(&organization, &request.owner_email),
            )
            .await;

        Ok(InitOutcome::Created(CreatedOrganization {
            organization,
            tenant,
            tenant_reused,
            event_published,
            task_sent,
            replaced,
        }))
    }

    /// Announce and remove an organization with its tenant.
    #[instrument(skip(self, organization), fields(slug = %organization.slug))]
    pub async fn delete_organization(
        &self,
        organization: &Organization,
    ) -> BootstrapResult<DeletedOrganization> {
        let payload = OrgDeletedPayload::new(organization, Utc::now()).to_payload()?;
        let event_published = self
            .publisher
            .publish_org_event(EventType::OrgDeleted, payload)
            .await;

        let mut kwargs = Map::new();
        kwargs.insert("slug_name".to_string(), json!(organization.slug));
        let task_sent = self.tasks.send_task(DELETE_ORGANIZATION_TASK, kwargs).await;

        let vhost = match organization.vhost_or_empty() {
            "" => organization.slug.as_str(),
            vhost => vhost,
        };
        self.provisioner.delete_tenant(vhost, &organization.slug).await?;
        self.store.delete(organization.id).await?;

        info!(org_id = %organization.id, "Deleted organization");
        Ok(DeletedOrganization {
            organization: organization.clone(),
            event_published,
            task_sent,
        })
    }

    /// Apply a space counter change and return the new total.
    pub async fn adjust_total_spaces(&self, slug: &str, action: SpaceAction) -> BootstrapResult<i64> {
        let total = self.store.adjust_total_spaces(slug, action).await?;
        info!(slug, ?action, total, "Updated organization space count");
        Ok(total)
    }
}

fn new_organization_kwargs(organization: &Organization, owner_email: &str) -> Map<String, Value> {
    let mut kwargs = Map::new();
    kwargs.insert("id".to_string(), json!(organization.id));
    kwargs.insert("name".to_string(), json!(organization.name));
    kwargs.insert("slug_name".to_string(), json!(organization.slug));
    kwargs.insert("is_active".to_string(), json!(organization.is_active));
    kwargs.insert("owner".to_string(), json!({ "email": owner_email }));
    kwargs.insert(
        "created_at".to_string(),
        json!(console_events::format_timestamp(&organization.created_at)),
    );
    kwargs.insert(
        "updated_at".to_string(),
        json!(console_events::format_timestamp(&organization.updated_at)),
    );
    kwargs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(InitRequest::new("Acme", "acme", "owner@acme.io").validate().is_ok());
        assert!(matches!(
            InitRequest::new("", "acme", "owner@acme.io").validate(),
            Err(BootstrapError::InvalidRequest(_))
        ));
        assert!(matches!(
            InitRequest::new("Acme", " ", "owner@acme.io").validate(),
            Err(BootstrapError::InvalidRequest(_))
        ));
        assert!(matches!(
            InitRequest::new("Acme", "acme", "nobody").validate(),
            Err(BootstrapError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_new_organization_kwargs() {
        let org = Organization::new(Uuid::new_v4(), "Acme", "acme").unwrap();
        let kwargs = new_organization_kwargs(&org, "owner@acme.io");

        assert_eq!(kwargs["slug_name"], "acme");
        assert_eq!(kwargs["is_active"], true);
        assert_eq!(kwargs["owner"]["email"], "owner@acme.io");
        assert_eq!(kwargs["id"], json!(org.id.to_string()));
    }
}
