//! console-bootstrap
//!
//! Initializes this deployment's organization, runs the discovery listener,
//! and publishes ad-hoc lifecycle events for administrators.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console_bootstrap::{
    startup, BootstrapConfig, BootstrapOrchestrator, BrokerTaskSender, InitOutcome, InitRequest,
};
use console_events::{
    AmqpBroker, Broker, DiscoveryHandler, DiscoveryListener, EventPublisher, EventType,
    ListenerGuard,
};
use console_org::{MemoryOrganizationStore, OrganizationStore};
use console_tenant::{RabbitMqProvisioner, TenantProvisioner};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "console-bootstrap", version, about = "Organization bootstrap and tenant discovery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create this deployment's organization and its broker tenant
    InitOrganization {
        /// Name of the organization
        #[arg(long, env = "ORG_NAME")]
        org_name: String,

        /// Slug of the organization
        #[arg(long, env = "ORG_SLUG")]
        org_slug: String,

        /// Owner email
        #[arg(long, env = "OWNER_EMAIL")]
        owner_email: String,
    },

    /// Declare the event topology and answer discovery requests until Ctrl-C
    Listen {
        /// Initialize this organization before listening
        #[arg(long, env = "ORG_NAME", requires_all = ["org_slug", "owner_email"])]
        org_name: Option<String>,

        /// Slug of the organization to initialize
        #[arg(long, env = "ORG_SLUG")]
        org_slug: Option<String>,

        /// Owner email of the organization to initialize
        #[arg(long, env = "OWNER_EMAIL")]
        owner_email: Option<String>,
    },

    /// Publish one lifecycle event
    Publish {
        /// Event type, also the routing key (e.g. org.created)
        #[arg(long)]
        event_type: String,

        /// JSON object payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

struct App {
    config: BootstrapConfig,
    broker: Arc<dyn Broker>,
    store: Arc<dyn OrganizationStore>,
    provisioner: Arc<dyn TenantProvisioner>,
}

impl App {
    fn new(config: BootstrapConfig) -> Result<Self> {
        let broker: Arc<dyn Broker> = Arc::new(AmqpBroker::new(config.events.rabbitmq_url.clone()));
        let provisioner = RabbitMqProvisioner::new(config.management.clone())
            .context("failed to build the broker management client")?;

        Ok(Self {
            config,
            broker,
            // The relational store lives in the console API; this binary keeps
            // organization state for its own lifetime only.
            store: Arc::new(MemoryOrganizationStore::new()),
            provisioner: Arc::new(provisioner),
        })
    }

    fn publisher(&self) -> EventPublisher {
        EventPublisher::new(Arc::clone(&self.broker), self.config.events.clone())
    }

    fn listener(&self) -> DiscoveryListener {
        let handler = DiscoveryHandler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provisioner),
            self.config.events.clone(),
        );
        DiscoveryListener::new(Arc::clone(&self.broker), handler, self.config.events.clone())
    }

    fn orchestrator(&self) -> BootstrapOrchestrator {
        let tasks = BrokerTaskSender::new(Arc::clone(&self.broker), self.config.tasks_namespace.clone());
        BootstrapOrchestrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provisioner),
            self.publisher(),
            Arc::new(tasks),
        )
        .with_tenant_port(self.config.tenant_port)
    }
}

async fn init_organization(app: &App, request: InitRequest) -> Result<()> {
    match app.orchestrator().init_organization(&request).await? {
        InitOutcome::Created(created) => info!(
            org_id = %created.organization.id,
            vhost = %created.tenant.vhost,
            event_published = created.event_published,
            task_sent = created.task_sent,
            "Organization initialized"
        ),
        InitOutcome::AlreadyExists(existing) => info!(
            org_id = %existing.id,
            "Organization already initialized"
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = BootstrapConfig::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = App::new(config)?;

    match cli.command {
        Command::InitOrganization {
            org_name,
            org_slug,
            owner_email,
        } => {
            init_organization(&app, InitRequest::new(org_name, org_slug, owner_email)).await?;
        }
        Command::Listen {
            org_name,
            org_slug,
            owner_email,
        } => {
            if let (Some(name), Some(slug), Some(email)) = (org_name, org_slug, owner_email) {
                init_organization(&app, InitRequest::new(name, slug, email)).await?;
            }

            let guard = ListenerGuard::new();
            let handle = startup(&app.publisher(), &app.listener(), &guard).await;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("Shutting down");
            if let Some(handle) = handle {
                handle.stop();
            }
        }
        Command::Publish {
            event_type,
            payload,
        } => {
            let payload: Map<String, Value> =
                serde_json::from_str(&payload).context("payload must be a JSON object")?;
            let event_type = EventType::parse(&event_type);

            if !app.publisher().publish_org_event(event_type.clone(), payload).await {
                bail!("failed to publish {}", event_type);
            }
            info!(event_type = %event_type, "Event published");
        }
    }

    Ok(())
}
