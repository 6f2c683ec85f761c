use std::sync::Arc;
use std::time::Duration;

use crate::queue::MessageQueue;
use crate::registry::ConnectionRegistry;
use crate::services::ConnectionEvents;
use crate::store::ItemStore;
use crate::websocket::ConnectionHub;

/// Shared collaborators handed to every HTTP handler and WebSocket session
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ItemStore>,
    pub operations: Arc<dyn MessageQueue>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub hub: Arc<ConnectionHub>,
    pub events: Arc<ConnectionEvents>,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
}

impl AppState {
    /// Connection events register against the hub's instance and echo through it.
    pub fn new(
        store: Arc<dyn ItemStore>,
        operations: Arc<dyn MessageQueue>,
        registry: Arc<dyn ConnectionRegistry>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        let events = Arc::new(ConnectionEvents::new(registry.clone(), hub.clone()));
        Self {
            store,
            operations,
            registry,
            hub,
            events,
            heartbeat_interval: Duration::from_secs(5),
            client_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.client_timeout = timeout;
        self
    }
}
