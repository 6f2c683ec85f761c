/// Notification dispatcher
///
/// Fans a completion notification out to every connection registered for
/// its request id. Each push is isolated: a connection that is gone gets
/// pruned from the registry, one hosted by an unreachable instance is left
/// alone, any other failure is logged. The remaining connections are always
/// attempted.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{ProcessError, RecordHandler};
use crate::metrics;
use crate::models::NotificationMessage;
use crate::registry::ConnectionRegistry;
use crate::websocket::{ConnectionPusher, PushError, PushMessage};

/// Per-notification delivery summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub request_id: String,
    pub attempted: usize,
    pub delivered: usize,
    pub pruned: usize,
    /// Hosted by another instance this process cannot reach
    pub skipped: usize,
    pub failed: usize,
}

pub struct NotificationDispatcher {
    registry: Arc<dyn ConnectionRegistry>,
    pusher: Arc<dyn ConnectionPusher>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, pusher: Arc<dyn ConnectionPusher>) -> Self {
        Self { registry, pusher }
    }

    /// Parse a queue record body and dispatch it.
    pub async fn dispatch(&self, body: &str) -> Result<DispatchReport, ProcessError> {
        if body.is_empty() {
            return Err(ProcessError::EmptyBody);
        }
        let message: NotificationMessage = serde_json::from_str(body)?;
        self.dispatch_message(&message).await
    }

    pub async fn dispatch_message(
        &self,
        message: &NotificationMessage,
    ) -> Result<DispatchReport, ProcessError> {
        let request_id = match message.request_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProcessError::MissingRequestId),
        };

        let connections = self.registry.find_by_request_id(request_id).await?;
        info!(
            request_id = %request_id,
            count = connections.len(),
            "Found connections for request"
        );

        let mut report = DispatchReport {
            request_id: request_id.to_string(),
            ..Default::default()
        };

        if connections.is_empty() {
            warn!(request_id = %request_id, "No connections found for request");
            return Ok(report);
        }

        let frame = PushMessage::notification(request_id, message);

        for connection in &connections {
            let connection_id = connection.connection_id.as_str();
            report.attempted += 1;

            match self.pusher.push(connection, &frame).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_push("delivered");
                    info!(connection_id = %connection_id, "Notification sent to connection");
                }
                Err(e) if e.is_gone() => {
                    metrics::record_push("gone");
                    info!(
                        connection_id = %connection_id,
                        "Connection is gone, removing from registry"
                    );
                    match self.registry.unregister(connection_id).await {
                        Ok(()) => {
                            report.pruned += 1;
                            metrics::record_prune();
                        }
                        Err(e) => {
                            error!(
                                connection_id = %connection_id,
                                error = %e,
                                "Failed to prune gone connection"
                            );
                        }
                    }
                }
                Err(PushError::NotHosted(_)) => {
                    report.skipped += 1;
                    metrics::record_push("not_hosted");
                    warn!(
                        connection_id = %connection_id,
                        instance_id = %connection.instance_id,
                        "Connection hosted by an unreachable instance, leaving registration"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_push("failed");
                    error!(
                        connection_id = %connection_id,
                        error = %e,
                        "Error sending to connection"
                    );
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl RecordHandler for NotificationDispatcher {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn handle(&self, body: &str) -> Result<(), ProcessError> {
        match self.dispatch(body).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(error = %e, "Error processing notification record");
                Err(e)
            }
        }
    }
}
