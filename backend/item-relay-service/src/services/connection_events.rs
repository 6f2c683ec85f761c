/// Connect / disconnect / default-route events of the WebSocket transport
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::models::Connection;
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::websocket::{ConnectionHub, PushError, PushMessage};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("No connection ID")]
    MissingConnectionId,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid message body: {0}")]
    InvalidBody(#[from] serde_json::Error),

    #[error("Push failed: {0}")]
    Push(#[from] PushError),
}

pub struct ConnectionEvents {
    registry: Arc<dyn ConnectionRegistry>,
    hub: Arc<ConnectionHub>,
}

impl ConnectionEvents {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, hub: Arc<ConnectionHub>) -> Self {
        Self { registry, hub }
    }

    /// Register a new connection owned by this hub's instance; an absent
    /// request id registers as "".
    pub async fn connect(
        &self,
        connection_id: &str,
        request_id: Option<&str>,
    ) -> Result<Connection, EventError> {
        if connection_id.is_empty() {
            return Err(EventError::MissingConnectionId);
        }

        let connection = Connection::new(connection_id, request_id.unwrap_or_default())
            .hosted_on(self.hub.instance_id());
        self.registry.register(&connection).await?;

        info!(
            connection_id = %connection.connection_id,
            request_id = %connection.request_id,
            "Connection stored"
        );
        Ok(connection)
    }

    pub async fn disconnect(&self, connection_id: &str) -> Result<(), EventError> {
        if connection_id.is_empty() {
            return Err(EventError::MissingConnectionId);
        }

        self.registry.unregister(connection_id).await?;
        info!(connection_id = %connection_id, "Connection removed");
        Ok(())
    }

    /// Echo a client message back to the same connection.
    pub async fn message(&self, connection_id: &str, body: &str) -> Result<(), EventError> {
        if connection_id.is_empty() {
            return Err(EventError::MissingConnectionId);
        }

        let parsed: Value = if body.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(body).map_err(|e| {
                error!(connection_id = %connection_id, error = %e, "Error handling message");
                e
            })?
        };

        self.hub
            .deliver(connection_id, &PushMessage::echo(&parsed))
            .await?;
        Ok(())
    }
}
