/// Create processor
///
/// Consumes Operation Messages, writes the item to the store and, when a
/// notification queue is configured, enqueues a completion notification
/// tagged with the originating request id.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ProcessError, RecordHandler};
use crate::models::{
    iso_timestamp, Item, NotificationMessage, OperationMessage, CREATED_AT_FIELD,
    CREATE_OPERATION, ID_FIELD, UPDATED_AT_FIELD,
};
use crate::queue::MessageQueue;
use crate::store::ItemStore;

/// Result of one successfully processed create
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub item: Item,
    /// Request id carried by the enqueued notification, if one was sent
    pub notified_request_id: Option<String>,
}

pub struct CreateProcessor {
    store: Arc<dyn ItemStore>,
    notifications: Option<Arc<dyn MessageQueue>>,
}

impl CreateProcessor {
    pub fn new(store: Arc<dyn ItemStore>, notifications: Option<Arc<dyn MessageQueue>>) -> Self {
        if notifications.is_none() {
            warn!("No notification queue configured, creates will not be announced");
        }
        Self {
            store,
            notifications,
        }
    }

    pub async fn process(&self, body: &str) -> Result<CreateOutcome, ProcessError> {
        if body.is_empty() {
            return Err(ProcessError::EmptyBody);
        }

        let message: OperationMessage = serde_json::from_str(body)?;

        if message.operation.as_deref() != Some(CREATE_OPERATION) {
            return Err(ProcessError::UnsupportedOperation(
                message
                    .operation
                    .unwrap_or_else(|| "<missing>".to_string()),
            ));
        }

        let mut item = match message.payload {
            None | Some(Value::Null) => Item::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ProcessError::InvalidPayload(
                    "payload must be a JSON object".to_string(),
                ))
            }
        };

        let id = match item.get(ID_FIELD) {
            None => {
                let generated = Uuid::new_v4().to_string();
                item.insert(ID_FIELD.to_string(), Value::String(generated.clone()));
                generated
            }
            Some(Value::String(id)) => id.clone(),
            Some(_) => {
                return Err(ProcessError::InvalidPayload(
                    "`id` must be a string".to_string(),
                ))
            }
        };

        let now = Value::String(iso_timestamp(Utc::now()));
        item.insert(CREATED_AT_FIELD.to_string(), now.clone());
        item.insert(UPDATED_AT_FIELD.to_string(), now);

        info!(item_id = %id, "Creating item");
        self.store.put(&item).await?;
        info!(item_id = %id, "Successfully created item");

        let Some(queue) = &self.notifications else {
            return Ok(CreateOutcome {
                item,
                notified_request_id: None,
            });
        };

        let request_id = message
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let notification =
            NotificationMessage::success(&request_id, CREATE_OPERATION, Value::Object(item.clone()));

        queue.send(serde_json::to_string(&notification)?).await?;
        info!(request_id = %request_id, queue = %queue.name(), "Notification sent");

        Ok(CreateOutcome {
            item,
            notified_request_id: Some(request_id),
        })
    }
}

#[async_trait]
impl RecordHandler for CreateProcessor {
    fn name(&self) -> &'static str {
        "create"
    }

    async fn handle(&self, body: &str) -> Result<(), ProcessError> {
        match self.process(body).await {
            Ok(_) => Ok(()),
            Err(e @ ProcessError::UnsupportedOperation(_)) => {
                warn!(error = %e, "Skipping record");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Error processing record");
                Err(e)
            }
        }
    }
}
