//! # Console Bootstrap
//!
//! Sequencing for creating and deleting this deployment's organization,
//! downstream task dispatch, and the process startup hook that declares the
//! event topology and starts tenant discovery.
//!
//! ## Example
//!
//! ```rust,no_run
//! use console_bootstrap::{BootstrapOrchestrator, BrokerTaskSender, InitRequest};
//! use console_events::{EventPublisher, EventsConfig, MemoryBroker};
//! use console_org::MemoryOrganizationStore;
//! use console_tenant::MemoryProvisioner;
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), console_bootstrap::BootstrapError> {
//!     let broker = Arc::new(MemoryBroker::new());
//!     let orchestrator = BootstrapOrchestrator::new(
//!         Arc::new(MemoryOrganizationStore::new()),
//!         Arc::new(MemoryProvisioner::new()),
//!         EventPublisher::new(broker.clone(), EventsConfig::default()),
//!         Arc::new(BrokerTaskSender::new(broker, "spacedf")),
//!     );
//!
//!     let outcome = orchestrator
//!         .init_organization(&InitRequest::new("Acme", "acme", "owner@acme.io"))
//!         .await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod startup;
pub mod tasks;

pub use config::{BootstrapConfig, DEFAULT_TENANT_PORT};
pub use error::{BootstrapError, BootstrapResult};
pub use orchestrator::{
    BootstrapOrchestrator, CreatedOrganization, DeletedOrganization, InitOutcome, InitRequest,
};
pub use startup::startup;
pub use tasks::{
    task_routing_key, BrokerTaskSender, TaskMessage, TaskSender, DELETE_ORGANIZATION_TASK,
    NEW_ORGANIZATION_TASK,
};
