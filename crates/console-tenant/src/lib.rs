//! # Console Tenant
//!
//! Broker-level tenant provisioning for console organizations.
//!
//! ## Overview
//!
//! Every organization owns an isolated messaging namespace on the broker:
//! a virtual host, a topic exchange and two data queues. This crate handles:
//! - **TenantInfo**: connection metadata for a provisioned tenant
//! - **TenantProvisioner**: the provisioning capability (create, delete, probe)
//! - **RabbitMqProvisioner**: implementation over the broker management HTTP API
//! - **MemoryProvisioner**: in-process implementation for tests and local runs
//! - **tenant_exists**: the existence scan used before provisioning
//!
//! ## Naming
//!
//! Exchange and queue names are derived from the organization slug:
//!
//! ```text
//! {slug}.exchange
//! {slug}.transformer.queue
//! {slug}.transformed.data.queue
//! ```
//!
//! The virtual host and AMQP URL are assigned by the broker side.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use console_tenant::{tenant_exists, ManagementConfig, RabbitMqProvisioner, TenantProvisioner};
//! use uuid::Uuid;
//!
//! async fn provision(slug: &str) -> Result<(), console_tenant::TenantError> {
//!     let provisioner = RabbitMqProvisioner::new(ManagementConfig::from_env())?;
//!
//!     let tenant = match tenant_exists(&provisioner, slug).await {
//!         Some(existing) => existing,
//!         None => provisioner.provision_tenant(Uuid::new_v4(), slug, 1112).await?,
//!     };
//!
//!     println!("tenant lives in vhost {}", tenant.vhost);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod rabbitmq;
pub mod tenant;

pub use config::ManagementConfig;
pub use error::{TenantError, TenantResult};
pub use memory::MemoryProvisioner;
pub use rabbitmq::RabbitMqProvisioner;
pub use tenant::{tenant_exists, TenantInfo, TenantProvisioner, DEFAULT_VHOST};
