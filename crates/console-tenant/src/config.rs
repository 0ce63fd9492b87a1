//! Broker management API configuration.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for a local RabbitMQ with the management plugin enabled.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for reaching the broker management API and for building tenant
/// AMQP URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// Base URL of the management API (e.g., "http://localhost:15672").
    pub api_url: String,

    /// Management user, also granted permissions on every tenant vhost.
    pub username: String,

    /// Management password.
    pub password: String,

    /// Broker host advertised in tenant AMQP URLs.
    pub amqp_host: String,

    /// Broker AMQP port advertised in tenant AMQP URLs.
    pub amqp_port: u16,

    /// Routing key binding the transformer queue to the tenant exchange.
    pub transformer_binding: String,

    /// Routing key binding the transformed queue to the tenant exchange.
    pub transformed_binding: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:15672".to_string(),
            username: "default".to_string(),
            password: "password".to_string(),
            amqp_host: "rabbitmq".to_string(),
            amqp_port: 5672,
            transformer_binding: "raw.#".to_string(),
            transformed_binding: "transformed.#".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ManagementConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RABBITMQ_MANAGEMENT_API_URL`: management API URL (default: http://localhost:15672)
    /// - `RABBITMQ_DEFAULT_USER`: management user (default: default)
    /// - `RABBITMQ_DEFAULT_PASS`: management password (default: password)
    /// - `RABBITMQ_HOST`: host advertised to tenants (default: rabbitmq)
    /// - `RABBITMQ_AMQP_PORT`: port advertised to tenants (default: 5672)
    /// - `RABBITMQ_MANAGEMENT_TIMEOUT_SECS`: request timeout (default: 10)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            api_url: std::env::var("RABBITMQ_MANAGEMENT_API_URL").unwrap_or(default.api_url),
            username: std::env::var("RABBITMQ_DEFAULT_USER").unwrap_or(default.username),
            password: std::env::var("RABBITMQ_DEFAULT_PASS").unwrap_or(default.password),
            amqp_host: std::env::var("RABBITMQ_HOST").unwrap_or(default.amqp_host),
            amqp_port: std::env::var("RABBITMQ_AMQP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.amqp_port),
            transformer_binding: default.transformer_binding,
            transformed_binding: default.transformed_binding,
            timeout_secs: std::env::var("RABBITMQ_MANAGEMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.timeout_secs),
        }
    }

    /// Request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagementConfig::default();
        assert_eq!(config.api_url, "http://localhost:15672");
        assert_eq!(config.amqp_port, 5672);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }
}
