//! Downstream task dispatch
//!
//! Worker services pick up organization tasks from the broker. Each task
//! has its own durable direct exchange named after the task, and messages
//! are routed with `{namespace}.tasks.{name}`.

use async_trait::async_trait;
use console_events::{Broker, BrokerError, BrokerResult, ExchangeSpec, MessageProperties};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Task sent after an organization is created.
pub const NEW_ORGANIZATION_TASK: &str = "new_organization";

/// Task sent before an organization is deleted.
pub const DELETE_ORGANIZATION_TASK: &str = "delete_organization";

/// Routing key of a task.
pub fn task_routing_key(namespace: &str, name: &str) -> String {
    format!("{}.tasks.{}", namespace, name)
}

/// Wire format of a task message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique task id
    pub id: Uuid,
    /// Task name
    pub task: String,
    /// Task arguments
    pub kwargs: Map<String, Value>,
}

impl TaskMessage {
    /// A task with a fresh id.
    pub fn new(name: impl Into<String>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: name.into(),
            kwargs,
        }
    }
}

/// Sends tasks to downstream workers.
#[async_trait]
pub trait TaskSender: Send + Sync {
    /// Send a task. Returns `false` when the task could not be handed to
    /// the broker; failures are logged, never raised.
    async fn send_task(&self, name: &str, kwargs: Map<String, Value>) -> bool;
}

/// [`TaskSender`] publishing to the shared broker.
#[derive(Clone)]
pub struct BrokerTaskSender {
    broker: Arc<dyn Broker>,
    namespace: String,
}

impl BrokerTaskSender {
    /// Create a sender routing under `namespace`.
    pub fn new(broker: Arc<dyn Broker>, namespace: impl Into<String>) -> Self {
        Self {
            broker,
            namespace: namespace.into(),
        }
    }

    async fn try_send(&self, message: &TaskMessage) -> BrokerResult<()> {
        let body = serde_json::to_vec(message)
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        let routing_key = task_routing_key(&self.namespace, &message.task);
        let channel = self.broker.connect().await?;

        let result: BrokerResult<()> = async {
            channel
                .declare_exchange(&ExchangeSpec::direct(&message.task))
                .await?;
            channel
                .publish(
                    &message.task,
                    &routing_key,
                    &MessageProperties::persistent_json(),
                    &body,
                )
                .await
        }
        .await;

        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close task connection");
        }
        result
    }
}

#[async_trait]
impl TaskSender for BrokerTaskSender {
    async fn send_task(&self, name: &str, kwargs: Map<String, Value>) -> bool {
        let message = TaskMessage::new(name, kwargs);

        match self.try_send(&message).await {
            Ok(()) => {
                info!(task = name, task_id = %message.id, "Sent task");
                true
            }
            Err(e) => {
                warn!(task = name, error = %e, "Failed to send task");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_events::{MemoryBroker, QueueSpec};
    use serde_json::json;

    #[test]
    fn test_routing_key() {
        assert_eq!(
            task_routing_key("spacedf", NEW_ORGANIZATION_TASK),
            "spacedf.tasks.new_organization"
        );
    }

    #[tokio::test]
    async fn test_send_task_reaches_worker_queue() {
        let broker = MemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange(&ExchangeSpec::direct(DELETE_ORGANIZATION_TASK))
            .await
            .unwrap();
        channel
            .declare_queue(&QueueSpec::durable("worker.delete_organization"))
            .await
            .unwrap();
        channel
            .bind_queue(
                "worker.delete_organization",
                DELETE_ORGANIZATION_TASK,
                "spacedf.tasks.delete_organization",
            )
            .await
            .unwrap();

        let sender = BrokerTaskSender::new(Arc::new(broker.clone()), "spacedf");
        let mut kwargs = Map::new();
        kwargs.insert("slug_name".to_string(), json!("acme"));
        assert!(sender.send_task(DELETE_ORGANIZATION_TASK, kwargs.clone()).await);

        let message = broker.take_message("worker.delete_organization").unwrap();
        assert!(message.properties.persistent);
        let task: TaskMessage = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(task.task, DELETE_ORGANIZATION_TASK);
        assert_eq!(task.kwargs, kwargs);
    }

    #[tokio::test]
    async fn test_send_task_unreachable_broker() {
        let broker = MemoryBroker::new();
        broker.set_refuse_connections(true);

        let sender = BrokerTaskSender::new(Arc::new(broker), "spacedf");
        assert!(!sender.send_task(NEW_ORGANIZATION_TASK, Map::new()).await);
    }
}
