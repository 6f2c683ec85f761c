/// End-to-end fan-out tests
///
/// Registry + hub + dispatcher wired the way the service wires them, with
/// hub channels standing in for WebSocket sessions.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use item_relay_service::models::{Connection, NotificationMessage};
use item_relay_service::queue::{InMemoryQueue, MessageQueue};
use item_relay_service::registry::{ConnectionRegistry, InMemoryConnectionRegistry};
use item_relay_service::store::InMemoryItemStore;
use item_relay_service::websocket::{relay, InstanceRelay, PushError, RelayedFrame};
use item_relay_service::{
    ConnectionEvents, ConnectionHub, CreateProcessor, NotificationDispatcher, ProcessError,
    QueueWorker, WorkerSettings,
};
use serde_json::{json, Value};

struct Fixture {
    registry: Arc<InMemoryConnectionRegistry>,
    hub: Arc<ConnectionHub>,
    events: ConnectionEvents,
    dispatcher: NotificationDispatcher,
}

fn fixture() -> Fixture {
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let hub = Arc::new(ConnectionHub::new());
    Fixture {
        events: ConnectionEvents::new(registry.clone(), hub.clone()),
        dispatcher: NotificationDispatcher::new(registry.clone(), hub.clone()),
        registry,
        hub,
    }
}

fn notification(request_id: &str) -> NotificationMessage {
    NotificationMessage::success(request_id, "create", json!({"id": "item-1", "name": "x"}))
}

#[tokio::test]
async fn test_fan_out_then_unregister() {
    let f = fixture();
    let mut c1 = f.hub.attach("C1").await;
    let mut c2 = f.hub.attach("C2").await;
    f.events.connect("C1", Some("R1")).await.unwrap();
    f.events.connect("C2", Some("R1")).await.unwrap();

    let report = f.dispatcher.dispatch_message(&notification("R1")).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 2);

    for rx in [&mut c1, &mut c2] {
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["requestId"], "R1");
        assert_eq!(frame["status"], "success");
        assert_eq!(frame["result"]["id"], "item-1");
    }

    f.events.disconnect("C1").await.unwrap();

    let report = f.dispatcher.dispatch_message(&notification("R1")).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.delivered, 1);
    assert!(c2.recv().await.is_some());
    assert!(c1.try_recv().is_err());
    assert!(f.registry.get("C1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_gone_connection_is_pruned_without_touching_others() {
    let f = fixture();
    let mut live = f.hub.attach("live").await;
    // Owned by this instance but without a live session.
    f.registry
        .register(&Connection::new("stale", "R1").hosted_on(f.hub.instance_id()))
        .await
        .unwrap();
    f.events.connect("live", Some("R1")).await.unwrap();

    let report = f.dispatcher.dispatch_message(&notification("R1")).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.pruned, 1);
    assert!(live.recv().await.is_some());
    assert!(f.registry.get("stale").await.unwrap().is_none());
    assert!(f.registry.get("live").await.unwrap().is_some());
}

#[tokio::test]
async fn test_closed_session_is_pruned() {
    let f = fixture();
    let rx = f.hub.attach("C1").await;
    f.events.connect("C1", Some("R1")).await.unwrap();
    drop(rx);

    let report = f.dispatcher.dispatch_message(&notification("R1")).await.unwrap();

    assert_eq!(report.pruned, 1);
    assert!(f.registry.is_empty().await);
    assert!(!f.hub.is_attached("C1").await);
}

#[tokio::test]
async fn test_nobody_listening_is_not_an_error() {
    let f = fixture();

    let report = f.dispatcher.dispatch_message(&notification("R9")).await.unwrap();

    assert_eq!(report.attempted, 0);
    assert_eq!(report.request_id, "R9");
}

#[tokio::test]
async fn test_other_request_ids_are_not_notified() {
    let f = fixture();
    let mut waiting = f.hub.attach("C1").await;
    let mut other = f.hub.attach("C2").await;
    f.events.connect("C1", Some("R1")).await.unwrap();
    f.events.connect("C2", Some("R2")).await.unwrap();

    f.dispatcher.dispatch_message(&notification("R1")).await.unwrap();

    assert!(waiting.recv().await.is_some());
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn test_rejects_body_without_request_id() {
    let f = fixture();

    let err = f.dispatcher.dispatch("").await.unwrap_err();
    assert!(matches!(err, ProcessError::EmptyBody));

    let err = f
        .dispatcher
        .dispatch(r#"{"operation":"create","status":"success","result":{}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::MissingRequestId));

    let err = f.dispatcher.dispatch("{oops").await.unwrap_err();
    assert!(matches!(err, ProcessError::Malformed(_)));
}

/// Create operation travels through both workers to the waiting socket.
#[tokio::test]
async fn test_create_reaches_waiting_connection() {
    let f = fixture();
    let store = Arc::new(InMemoryItemStore::new());
    let operations = Arc::new(InMemoryQueue::new("operations"));
    let notifications = Arc::new(InMemoryQueue::new("notifications"));

    let mut rx = f.hub.attach("C1").await;
    f.events.connect("C1", Some("R2")).await.unwrap();

    let create_worker = QueueWorker::new(
        operations.clone(),
        Arc::new(CreateProcessor::new(store.clone(), Some(notifications.clone()))),
        None,
        WorkerSettings::default(),
    );
    let notify_worker = QueueWorker::new(
        notifications.clone(),
        Arc::new(f.dispatcher),
        None,
        WorkerSettings::default(),
    );

    operations
        .send(json!({"operation":"create","requestId":"R2","payload":{"name":"x"}}).to_string())
        .await
        .unwrap();

    assert_eq!(create_worker.poll_once().await.unwrap().succeeded, 1);
    assert_eq!(notify_worker.poll_once().await.unwrap().succeeded, 1);

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["requestId"], "R2");
    assert_eq!(frame["operation"], "create");
    assert_eq!(frame["result"]["name"], "x");
    assert_eq!(store.len().await, 1);
}

/// Routes relayed frames straight to the owning hub the way the Redis listener does.
struct LoopbackRelay {
    hubs: RwLock<HashMap<String, Arc<ConnectionHub>>>,
    registry: Arc<InMemoryConnectionRegistry>,
}

impl LoopbackRelay {
    fn new(registry: Arc<InMemoryConnectionRegistry>) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            registry,
        }
    }

    fn join(&self, hub: Arc<ConnectionHub>) {
        self.hubs
            .write()
            .unwrap()
            .insert(hub.instance_id().to_string(), hub);
    }
}

#[async_trait]
impl InstanceRelay for LoopbackRelay {
    async fn forward(
        &self,
        instance_id: &str,
        connection_id: &str,
        frame: String,
    ) -> Result<(), PushError> {
        let owner = self.hubs.read().unwrap().get(instance_id).cloned();
        let Some(owner) = owner else {
            return Err(PushError::Gone(connection_id.to_string()));
        };
        let payload = serde_json::to_string(&RelayedFrame {
            connection_id: connection_id.to_string(),
            frame,
        })
        .unwrap();
        relay::handle_relayed(&owner, self.registry.as_ref(), &payload).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_connection_on_other_instance_is_not_pruned_without_relay() {
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let hub_a = Arc::new(ConnectionHub::with_instance_id("node-a"));
    let hub_b = Arc::new(ConnectionHub::with_instance_id("node-b"));

    let mut rx_b = hub_b.attach("C1").await;
    ConnectionEvents::new(registry.clone(), hub_b.clone())
        .connect("C1", Some("R1"))
        .await
        .unwrap();

    let report = NotificationDispatcher::new(registry.clone(), hub_a)
        .dispatch_message(&notification("R1"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.pruned, 0);
    assert_eq!(report.skipped, 1);
    assert!(registry.get("C1").await.unwrap().is_some());
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn test_relay_delivers_to_owning_instance() {
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let relay = Arc::new(LoopbackRelay::new(registry.clone()));
    let hub_a = Arc::new(ConnectionHub::with_instance_id("node-a").with_relay(relay.clone()));
    let hub_b = Arc::new(ConnectionHub::with_instance_id("node-b").with_relay(relay.clone()));
    relay.join(hub_a.clone());
    relay.join(hub_b.clone());

    let mut rx_a = hub_a.attach("C1").await;
    let mut rx_b = hub_b.attach("C2").await;
    ConnectionEvents::new(registry.clone(), hub_a.clone())
        .connect("C1", Some("R1"))
        .await
        .unwrap();
    ConnectionEvents::new(registry.clone(), hub_b.clone())
        .connect("C2", Some("R1"))
        .await
        .unwrap();

    let report = NotificationDispatcher::new(registry.clone(), hub_a)
        .dispatch_message(&notification("R1"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.pruned, 0);
    for rx in [&mut rx_a, &mut rx_b] {
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["requestId"], "R1");
    }
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_owning_instance_prunes_departed_session() {
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let relay = Arc::new(LoopbackRelay::new(registry.clone()));
    let hub_a = Arc::new(ConnectionHub::with_instance_id("node-a").with_relay(relay.clone()));
    let hub_b = Arc::new(ConnectionHub::with_instance_id("node-b").with_relay(relay.clone()));
    relay.join(hub_a.clone());
    relay.join(hub_b.clone());

    let rx_b = hub_b.attach("C1").await;
    ConnectionEvents::new(registry.clone(), hub_b.clone())
        .connect("C1", Some("R1"))
        .await
        .unwrap();
    drop(rx_b);

    NotificationDispatcher::new(registry.clone(), hub_a)
        .dispatch_message(&notification("R1"))
        .await
        .unwrap();

    assert!(registry.get("C1").await.unwrap().is_none());
    assert!(!hub_b.is_attached("C1").await);
}

#[tokio::test]
async fn test_connection_of_departed_instance_is_pruned() {
    let registry = Arc::new(InMemoryConnectionRegistry::new());
    let relay = Arc::new(LoopbackRelay::new(registry.clone()));
    let hub_a = Arc::new(ConnectionHub::with_instance_id("node-a").with_relay(relay.clone()));
    relay.join(hub_a.clone());

    registry
        .register(&Connection::new("C1", "R1").hosted_on("node-gone"))
        .await
        .unwrap();

    let report = NotificationDispatcher::new(registry.clone(), hub_a)
        .dispatch_message(&notification("R1"))
        .await
        .unwrap();

    assert_eq!(report.pruned, 1);
    assert!(registry.is_empty().await);
}
