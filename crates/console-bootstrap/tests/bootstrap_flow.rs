//! Bootstrap sequencing tests with in-memory collaborators.

use console_bootstrap::{
    startup, BootstrapError, BootstrapOrchestrator, BrokerTaskSender, InitOutcome, InitRequest,
    TaskMessage, DELETE_ORGANIZATION_TASK, NEW_ORGANIZATION_TASK,
};
use console_events::{
    Broker, DiscoveryHandler, DiscoveryListener, EventEnvelope, EventPublisher, EventType,
    EventsConfig, ExchangeSpec, ListenerGuard, MemoryBroker, PublishedMessage, QueueSpec,
};
use console_org::{MemoryOrganizationStore, OrgError, OrganizationStore, SpaceAction};
use console_tenant::{MemoryProvisioner, TenantError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const TRANSFORMER_QUEUE: &str = "transformer.org.events.queue";

struct TestFixture {
    broker: MemoryBroker,
    store: MemoryOrganizationStore,
    provisioner: Arc<MemoryProvisioner>,
    orchestrator: BootstrapOrchestrator,
}

impl TestFixture {
    async fn new() -> Self {
        let broker = MemoryBroker::new();
        let store = MemoryOrganizationStore::new();
        let provisioner = Arc::new(MemoryProvisioner::new());

        let orchestrator = BootstrapOrchestrator::new(
            Arc::new(store.clone()),
            provisioner.clone(),
            EventPublisher::new(Arc::new(broker.clone()), EventsConfig::default()),
            Arc::new(BrokerTaskSender::new(Arc::new(broker.clone()), "spacedf")),
        );

        let fixture = Self {
            broker,
            store,
            provisioner,
            orchestrator,
        };
        fixture.declare_subscribers().await;
        fixture
    }

    /// Declare the event topology and a worker queue per task.
    async fn declare_subscribers(&self) {
        let publisher = EventPublisher::new(Arc::new(self.broker.clone()), EventsConfig::default());
        publisher.declare_topology().await.unwrap().close().await.unwrap();

        let channel = self.broker.connect().await.unwrap();
        for task in [NEW_ORGANIZATION_TASK, DELETE_ORGANIZATION_TASK] {
            let queue = format!("worker.{}", task);
            channel.declare_exchange(&ExchangeSpec::direct(task)).await.unwrap();
            channel.declare_queue(&QueueSpec::durable(&queue)).await.unwrap();
            channel
                .bind_queue(&queue, task, &format!("spacedf.tasks.{}", task))
                .await
                .unwrap();
        }
        channel.close().await.unwrap();
    }

    fn events(&self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(message) = self.broker.take_message(TRANSFORMER_QUEUE) {
            events.push(EventEnvelope::decode(&message.body).unwrap());
        }
        events
    }

    fn task(&self, name: &str) -> Option<TaskMessage> {
        self.broker
            .take_message(&format!("worker.{}", name))
            .map(|m: PublishedMessage| serde_json::from_slice(&m.body).unwrap())
    }
}

fn request(slug: &str) -> InitRequest {
    InitRequest::new("SpaceDF", slug, "owner@spacedf.io")
}

#[tokio::test]
async fn test_init_creates_provisions_and_announces() {
    let fixture = TestFixture::new().await;

    let outcome = fixture
        .orchestrator
        .init_organization(&request("spacedf"))
        .await
        .unwrap();

    let created = match outcome {
        InitOutcome::Created(created) => created,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(!created.tenant_reused);
    assert!(created.event_published);
    assert!(created.task_sent);
    assert!(created.replaced.is_none());
    assert_eq!(created.tenant.exchange, "spacedf.exchange");
    assert_eq!(created.organization.rabbitmq_vhost.as_deref(), Some("spacedf"));
    assert!(created.organization.rabbitmq_provisioned_at.is_some());
    assert_eq!(fixture.provisioner.provision_calls(), 1);

    let stored = fixture.store.find_by_slug("spacedf").await.unwrap().unwrap();
    assert_eq!(stored.id, created.organization.id);
    assert_eq!(fixture.store.roles(stored.id).await.unwrap().len(), 4);
    assert_eq!(fixture.store.members(stored.id).await.unwrap()[0].email, "owner@spacedf.io");

    let events = fixture.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::OrgCreated);
    assert_eq!(events[0].payload["id"], stored.id.to_string());
    assert_eq!(events[0].payload["vhost"], "spacedf");
    assert_eq!(events[0].payload["transformed_queue"], "spacedf.transformed.data.queue");

    let task = fixture.task(NEW_ORGANIZATION_TASK).unwrap();
    assert_eq!(task.task, NEW_ORGANIZATION_TASK);
    assert_eq!(task.kwargs["slug_name"], "spacedf");
    assert_eq!(task.kwargs["owner"]["email"], "owner@spacedf.io");
}

#[tokio::test]
async fn test_init_is_a_no_op_for_the_same_slug() {
    let fixture = TestFixture::new().await;
    fixture.orchestrator.init_organization(&request("spacedf")).await.unwrap();
    fixture.events();
    fixture.task(NEW_ORGANIZATION_TASK);

    let outcome = fixture
        .orchestrator
        .init_organization(&request("spacedf"))
        .await
        .unwrap();

    assert!(matches!(outcome, InitOutcome::AlreadyExists(ref org) if org.slug == "spacedf"));
    assert_eq!(fixture.provisioner.provision_calls(), 1);
    assert!(fixture.events().is_empty());
    assert!(fixture.task(NEW_ORGANIZATION_TASK).is_none());
    assert_eq!(fixture.store.len().await, 1);
}

#[tokio::test]
async fn test_init_reuses_an_existing_tenant() {
    let fixture = TestFixture::new().await;
    fixture.provisioner.insert_exchange("spacedf", "spacedf.exchange");

    let outcome = fixture
        .orchestrator
        .init_organization(&request("spacedf"))
        .await
        .unwrap();

    match outcome {
        InitOutcome::Created(created) => {
            assert!(created.tenant_reused);
            assert_eq!(created.tenant.vhost, "spacedf");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(fixture.provisioner.provision_calls(), 0);
}

#[tokio::test]
async fn test_slug_change_replaces_the_previous_organization() {
    let fixture = TestFixture::new().await;
    fixture.orchestrator.init_organization(&request("acme")).await.unwrap();
    fixture.events();
    fixture.task(NEW_ORGANIZATION_TASK);

    let outcome = fixture
        .orchestrator
        .init_organization(&request("globex"))
        .await
        .unwrap();

    let created = match outcome {
        InitOutcome::Created(created) => created,
        other => panic!("unexpected outcome {:?}", other),
    };
    let replaced = created.replaced.unwrap();
    assert_eq!(replaced.organization.slug, "acme");
    assert!(replaced.event_published);
    assert!(replaced.task_sent);

    assert!(!fixture.provisioner.has_vhost("acme"));
    assert!(fixture.provisioner.has_vhost("globex"));
    assert!(fixture.store.find_by_slug("acme").await.unwrap().is_none());
    assert_eq!(fixture.store.first().await.unwrap().unwrap().slug, "globex");

    // Deletion is announced before the replacement is created.
    let types: Vec<EventType> = fixture.events().into_iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::OrgDeleted, EventType::OrgCreated]);

    let delete_task = fixture.task(DELETE_ORGANIZATION_TASK).unwrap();
    assert_eq!(delete_task.kwargs["slug_name"], "acme");
    assert!(fixture.task(NEW_ORGANIZATION_TASK).is_some());
}

#[tokio::test]
async fn test_broker_outage_does_not_block_creation() {
    let fixture = TestFixture::new().await;
    fixture.broker.set_refuse_connections(true);

    let outcome = fixture
        .orchestrator
        .init_organization(&request("spacedf"))
        .await
        .unwrap();

    match outcome {
        InitOutcome::Created(created) => {
            assert!(!created.event_published);
            assert!(!created.task_sent);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(fixture.store.find_by_slug("spacedf").await.unwrap().is_some());
}

#[tokio::test]
async fn test_unreachable_management_api_aborts_creation() {
    let fixture = TestFixture::new().await;
    fixture.provisioner.set_unreachable(true);

    let err = fixture
        .orchestrator
        .init_organization(&request("spacedf"))
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Tenant(TenantError::Unavailable(_))));
    assert!(fixture.store.is_empty().await);
    assert!(fixture.events().is_empty());
}

#[tokio::test]
async fn test_invalid_slug_is_rejected_before_provisioning() {
    let fixture = TestFixture::new().await;

    let err = fixture
        .orchestrator
        .init_organization(&request("space_df"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::Organization(OrgError::SlugContainsUnderscore(_))
    ));
    assert_eq!(fixture.provisioner.provision_calls(), 0);
}

#[tokio::test]
async fn test_space_counter() {
    let fixture = TestFixture::new().await;
    fixture.orchestrator.init_organization(&request("spacedf")).await.unwrap();

    let orchestrator = &fixture.orchestrator;
    assert_eq!(orchestrator.adjust_total_spaces("spacedf", SpaceAction::Add).await.unwrap(), 1);
    assert_eq!(orchestrator.adjust_total_spaces("spacedf", SpaceAction::Add).await.unwrap(), 2);
    assert_eq!(orchestrator.adjust_total_spaces("spacedf", SpaceAction::Remove).await.unwrap(), 1);
    assert_eq!(orchestrator.adjust_total_spaces("spacedf", SpaceAction::Remove).await.unwrap(), 1);
}

#[tokio::test]
async fn test_startup_declares_topology_and_answers_discovery() {
    let fixture = TestFixture::new().await;
    fixture.orchestrator.init_organization(&request("spacedf")).await.unwrap();
    fixture.events();

    let config = EventsConfig::default();
    let broker: Arc<dyn Broker> = Arc::new(fixture.broker.clone());
    let publisher = EventPublisher::new(Arc::clone(&broker), config.clone());
    let handler = DiscoveryHandler::new(
        Arc::new(fixture.store.clone()),
        fixture.provisioner.clone(),
        config.clone(),
    );
    let listener = DiscoveryListener::new(broker, handler, config);
    let guard = ListenerGuard::new();

    let mut handle = startup(&publisher, &listener, &guard).await.unwrap();
    assert!(startup(&publisher, &listener, &guard).await.is_none());
    assert!(timeout(Duration::from_secs(30), handle.wait_until_consuming())
        .await
        .unwrap());

    fixture
        .broker
        .inject("org.events", "org.discovery.request", b"{}")
        .unwrap();
    let answer = timeout(Duration::from_secs(30), fixture.broker.next_message(TRANSFORMER_QUEUE))
        .await
        .unwrap();
    let envelope = EventEnvelope::decode(&answer.body).unwrap();
    assert_eq!(envelope.event_type, EventType::OrgCreated);
    assert_eq!(envelope.payload["slug"], "spacedf");

    handle.stop();
}
