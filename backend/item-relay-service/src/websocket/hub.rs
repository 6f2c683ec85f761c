use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{ConnectionPusher, InstanceRelay, PushError, PushMessage};
use crate::metrics;
use crate::models::Connection;

/// WebSocket frame size limit (256 KB)
pub const WS_MESSAGE_SIZE_LIMIT: usize = 256_000;

/// Live WebSocket sessions hosted by this process
///
/// Each session owns the receiving half of an unbounded channel; the hub keeps
/// the sending half. Only connections registered with this hub's instance id
/// are delivered locally. Connections of other instances go through the relay
/// when one is configured and are reported `NotHosted` otherwise, so a remote
/// registration is never treated as gone.
pub struct ConnectionHub {
    instance_id: String,
    sessions: RwLock<HashMap<String, UnboundedSender<String>>>,
    relay: Option<Arc<dyn InstanceRelay>>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    /// Hub with a freshly generated instance id and no relay.
    pub fn new() -> Self {
        Self::with_instance_id(Uuid::new_v4().to_string())
    }

    pub fn with_instance_id(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            sessions: RwLock::new(HashMap::new()),
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn InstanceRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Attach a session and return the stream of frames destined for it.
    pub async fn attach(&self, connection_id: &str) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut sessions = self.sessions.write().await;
        sessions.insert(connection_id.to_string(), tx);
        metrics::set_active_sessions(sessions.len());
        debug!(connection_id = %connection_id, total = sessions.len(), "Session attached");
        rx
    }

    pub async fn detach(&self, connection_id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(connection_id).is_some() {
            metrics::set_active_sessions(sessions.len());
            debug!(connection_id = %connection_id, total = sessions.len(), "Session detached");
        }
    }

    pub async fn is_attached(&self, connection_id: &str) -> bool {
        self.sessions.read().await.contains_key(connection_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a message to a session attached to this hub.
    pub async fn deliver(&self, connection_id: &str, message: &PushMessage) -> Result<(), PushError> {
        let frame = encode_frame(message)?;
        self.deliver_frame(connection_id, frame).await
    }

    /// Send an already encoded frame to a session attached to this hub.
    pub async fn deliver_frame(&self, connection_id: &str, frame: String) -> Result<(), PushError> {
        let delivered = {
            let sessions = self.sessions.read().await;
            match sessions.get(connection_id) {
                Some(sender) => sender.send(frame).is_ok(),
                None => return Err(PushError::Gone(connection_id.to_string())),
            }
        };

        if !delivered {
            // Receiver dropped without a detach; forget the dead sender.
            self.detach(connection_id).await;
            return Err(PushError::Gone(connection_id.to_string()));
        }

        Ok(())
    }
}

pub(crate) fn encode_frame(message: &PushMessage) -> Result<String, PushError> {
    let frame = message
        .to_json()
        .map_err(|e| PushError::Transport(format!("failed to encode frame: {}", e)))?;

    if frame.len() > WS_MESSAGE_SIZE_LIMIT {
        return Err(PushError::Transport(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            frame.len(),
            WS_MESSAGE_SIZE_LIMIT
        )));
    }
    Ok(frame)
}

#[async_trait]
impl ConnectionPusher for ConnectionHub {
    async fn push(&self, connection: &Connection, message: &PushMessage) -> Result<(), PushError> {
        if connection.instance_id == self.instance_id {
            return self.deliver(&connection.connection_id, message).await;
        }

        match &self.relay {
            Some(relay) if !connection.instance_id.is_empty() => {
                let frame = encode_frame(message)?;
                relay
                    .forward(&connection.instance_id, &connection.connection_id, frame)
                    .await
            }
            _ => Err(PushError::NotHosted(connection.connection_id.clone())),
        }
    }
}
