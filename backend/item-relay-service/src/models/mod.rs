use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema-less store document, keyed by its `id` field.
pub type Item = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// The only operation the create processor accepts.
pub const CREATE_OPERATION: &str = "create";

/// Render an instant the way items carry their timestamps (ISO-8601, UTC).
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read the `id` field of an item when it is a string.
pub fn item_id(item: &Item) -> Option<&str> {
    item.get(ID_FIELD).and_then(Value::as_str)
}

/// Operation request queued by clients
///
/// `{"operation":"create","requestId":"...","payload":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    #[serde(default)]
    pub operation: Option<String>,

    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default)]
    pub payload: Option<Value>,
}

impl OperationMessage {
    pub fn create(request_id: impl Into<String>, payload: Item) -> Self {
        Self {
            operation: Some(CREATE_OPERATION.to_string()),
            request_id: Some(request_id.into()),
            payload: Some(Value::Object(payload)),
        }
    }
}

/// Outcome of an asynchronous operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[default]
    Success,
    Failure,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Failure => "failure",
        }
    }
}

/// Completion notification produced after an operation finishes
///
/// `{"requestId":"...","operation":"create","status":"success","result":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub operation: Option<String>,

    #[serde(default)]
    pub status: OperationStatus,

    #[serde(default)]
    pub result: Value,
}

impl NotificationMessage {
    pub fn success(request_id: impl Into<String>, operation: &str, result: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            operation: Some(operation.to_string()),
            status: OperationStatus::Success,
            result,
        }
    }
}

/// A registered client session waiting on a request id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub connection_id: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    /// Service instance hosting the socket; only that instance can push to it.
    #[serde(default)]
    pub instance_id: String,
}

impl Connection {
    pub fn new(connection_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            request_id: request_id.into(),
            created_at: Utc::now(),
            instance_id: String::new(),
        }
    }

    pub fn hosted_on(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }
}
