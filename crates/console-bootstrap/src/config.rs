//! Bootstrap configuration.

use console_events::EventsConfig;
use console_tenant::ManagementConfig;
use serde::{Deserialize, Serialize};

/// Port advertised for every provisioned tenant.
pub const DEFAULT_TENANT_PORT: u16 = 1112;

/// Everything the bootstrap binary needs, loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Broker, topology and discovery settings.
    pub events: EventsConfig,

    /// Broker management API settings.
    pub management: ManagementConfig,

    /// Prefix of downstream task routing keys.
    pub tasks_namespace: String,

    /// Port recorded on provisioned tenants.
    pub tenant_port: u16,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            events: EventsConfig::default(),
            management: ManagementConfig::default(),
            tasks_namespace: "spacedf".to_string(),
            tenant_port: DEFAULT_TENANT_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl BootstrapConfig {
    /// Load configuration from environment variables.
    ///
    /// Besides the variables read by [`EventsConfig::from_env`] and
    /// [`ManagementConfig::from_env`]:
    /// - `TASKS_NAMESPACE`: task routing key prefix (default: spacedf)
    /// - `LOG_LEVEL`: default log filter (default: info)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            events: EventsConfig::from_env(),
            management: ManagementConfig::from_env(),
            tasks_namespace: std::env::var("TASKS_NAMESPACE").unwrap_or(default.tasks_namespace),
            tenant_port: default.tenant_port,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(default.log_level),
        }
    }
}
