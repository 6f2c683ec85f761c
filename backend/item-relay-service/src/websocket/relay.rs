/// Cross-instance frame relay
///
/// Every instance subscribes to its own Redis channel before it accepts
/// sockets. A frame for a connection hosted elsewhere is published on the
/// owner's channel; the owner delivers it locally and is the only one that
/// prunes the registration when the socket is gone.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client, RedisResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::{ConnectionHub, PushError};
use crate::metrics;
use crate::registry::ConnectionRegistry;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceRelay: Send + Sync {
    /// Hand an encoded frame to the instance hosting `connection_id`.
    async fn forward(
        &self,
        instance_id: &str,
        connection_id: &str,
        frame: String,
    ) -> Result<(), PushError>;
}

/// Envelope published on an instance channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedFrame {
    pub connection_id: String,
    pub frame: String,
}

pub fn instance_channel(prefix: &str, instance_id: &str) -> String {
    format!("{}:instance:{}", prefix, instance_id)
}

pub struct RedisRelay {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRelay {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl InstanceRelay for RedisRelay {
    async fn forward(
        &self,
        instance_id: &str,
        connection_id: &str,
        frame: String,
    ) -> Result<(), PushError> {
        let payload = serde_json::to_string(&RelayedFrame {
            connection_id: connection_id.to_string(),
            frame,
        })
        .map_err(|e| PushError::Transport(format!("failed to encode relayed frame: {}", e)))?;

        let channel = instance_channel(&self.prefix, instance_id);
        let mut conn = self.conn.clone();
        let receivers: i64 = conn
            .publish(&channel, payload)
            .await
            .map_err(|e| PushError::Transport(format!("relay publish failed: {}", e)))?;

        // Owners subscribe before serving sockets; no listener means the owner is dead.
        if receivers == 0 {
            return Err(PushError::Gone(connection_id.to_string()));
        }

        debug!(
            instance_id = %instance_id,
            connection_id = %connection_id,
            "Frame relayed to hosting instance"
        );
        Ok(())
    }
}

/// Deliver a frame received on this instance's channel.
pub async fn handle_relayed(hub: &ConnectionHub, registry: &dyn ConnectionRegistry, payload: &str) {
    let relayed: RelayedFrame = match serde_json::from_str(payload) {
        Ok(relayed) => relayed,
        Err(e) => {
            warn!(error = %e, "Discarding undecodable relayed frame");
            return;
        }
    };

    let connection_id = relayed.connection_id.as_str();
    match hub.deliver_frame(connection_id, relayed.frame).await {
        Ok(()) => metrics::record_push("delivered"),
        Err(e) if e.is_gone() => {
            metrics::record_push("gone");
            info!(
                connection_id = %connection_id,
                "Relayed connection is gone, removing from registry"
            );
            match registry.unregister(connection_id).await {
                Ok(()) => metrics::record_prune(),
                Err(e) => error!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to prune gone connection"
                ),
            }
        }
        Err(e) => {
            metrics::record_push("failed");
            error!(connection_id = %connection_id, error = %e, "Error delivering relayed frame");
        }
    }
}

/// Open a dedicated pub/sub connection subscribed to `channel`.
pub async fn subscribe(client: &Client, channel: &str) -> RedisResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(pubsub)
}

/// Consume this instance's channel until shutdown, resubscribing on disconnect.
pub async fn run_listener(
    client: Client,
    channel: String,
    mut pubsub: PubSub,
    hub: Arc<ConnectionHub>,
    registry: Arc<dyn ConnectionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(channel = %channel, "Relay listener started");

    loop {
        {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        info!(channel = %channel, "Relay listener stopping");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(msg) => match msg.get_payload::<String>() {
                            Ok(payload) => handle_relayed(&hub, registry.as_ref(), &payload).await,
                            Err(e) => warn!(error = %e, "Relayed message without text payload"),
                        },
                        None => break,
                    },
                }
            }
        }

        warn!(channel = %channel, "Relay subscription ended, resubscribing");
        pubsub = loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {}
            }
            match subscribe(&client, &channel).await {
                Ok(pubsub) => break pubsub,
                Err(e) => error!(channel = %channel, error = %e, "Relay resubscribe failed"),
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Connection;
    use crate::registry::InMemoryConnectionRegistry;

    fn payload(connection_id: &str, frame: &str) -> String {
        serde_json::to_string(&RelayedFrame {
            connection_id: connection_id.into(),
            frame: frame.into(),
        })
        .unwrap()
    }

    #[test]
    fn test_instance_channel() {
        assert_eq!(instance_channel("item-relay", "node-a"), "item-relay:instance:node-a");
    }

    #[test]
    fn test_relayed_frame_wire_format() {
        let value: serde_json::Value = serde_json::from_str(&payload("c1", "{}")).unwrap();
        assert_eq!(value, serde_json::json!({"connectionId": "c1", "frame": "{}"}));
    }

    #[tokio::test]
    async fn test_relayed_frame_reaches_local_session() {
        let hub = ConnectionHub::with_instance_id("node-b");
        let registry = InMemoryConnectionRegistry::new();
        let mut rx = hub.attach("c1").await;

        handle_relayed(&hub, &registry, &payload("c1", r#"{"type":"echo"}"#)).await;

        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"echo"}"#);
    }

    #[tokio::test]
    async fn test_relayed_frame_for_departed_session_prunes() {
        let hub = ConnectionHub::with_instance_id("node-b");
        let registry = InMemoryConnectionRegistry::new();
        registry
            .register(&Connection::new("c1", "R1").hosted_on("node-b"))
            .await
            .unwrap();

        handle_relayed(&hub, &registry, &payload("c1", "{}")).await;

        assert!(registry.get("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_relay_payload_is_ignored() {
        let hub = ConnectionHub::with_instance_id("node-b");
        let registry = InMemoryConnectionRegistry::new();
        registry
            .register(&Connection::new("c1", "R1").hosted_on("node-b"))
            .await
            .unwrap();

        handle_relayed(&hub, &registry, "not json").await;

        assert!(registry.get("c1").await.unwrap().is_some());
    }
}
