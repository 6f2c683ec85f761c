use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NotificationMessage, OperationStatus};

/// Frames the server pushes to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushMessage {
    /// Completion of an operation the client is waiting on
    Notification {
        #[serde(rename = "requestId")]
        request_id: String,
        operation: Option<String>,
        status: OperationStatus,
        result: Value,
    },

    /// Reply to a default-route message
    Echo { message: String },
}

impl PushMessage {
    pub fn notification(request_id: &str, notification: &NotificationMessage) -> Self {
        PushMessage::Notification {
            request_id: request_id.to_string(),
            operation: notification.operation.clone(),
            status: notification.status,
            result: notification.result.clone(),
        }
    }

    /// Echo a parsed client body back as compact JSON text.
    pub fn echo(body: &Value) -> Self {
        PushMessage::Echo {
            message: format!("Echo: {}", body),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_frame() {
        let source = NotificationMessage::success("R1", "create", json!({"id": "a"}));
        let frame = serde_json::to_value(PushMessage::notification("R1", &source)).unwrap();

        assert_eq!(
            frame,
            json!({
                "type": "notification",
                "requestId": "R1",
                "operation": "create",
                "status": "success",
                "result": {"id": "a"}
            })
        );
    }

    #[test]
    fn test_echo_frame() {
        let frame = serde_json::to_value(PushMessage::echo(&json!({"ping": 1}))).unwrap();
        assert_eq!(frame, json!({"type": "echo", "message": "Echo: {\"ping\":1}"}));
    }
}
