pub mod connection_events;
pub mod create_processor;
pub mod notification_dispatcher;
pub mod queue_worker;

pub use connection_events::*;
pub use create_processor::*;
pub use notification_dispatcher::*;
pub use queue_worker::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::QueueError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Why a single queue record could not be processed
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Empty message body")]
    EmptyBody,

    #[error("Failed to parse message body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected operation type: {0}. Expected 'create'.")]
    UnsupportedOperation(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No request ID in message")]
    MissingRequestId,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ProcessError {
    /// Collaborator failures may succeed on redelivery; malformed input never will.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProcessError::Store(_) | ProcessError::Queue(_) | ProcessError::Registry(_)
        )
    }
}

/// Processes one queue record body
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    async fn handle(&self, body: &str) -> Result<(), ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(!ProcessError::EmptyBody.is_retriable());
        assert!(!ProcessError::MissingRequestId.is_retriable());
        assert!(!ProcessError::UnsupportedOperation("delete".into()).is_retriable());
        assert!(ProcessError::Store(StoreError::Backend("down".into())).is_retriable());
        assert!(ProcessError::Registry(RegistryError::Backend("down".into())).is_retriable());
    }

    #[test]
    fn test_malformed_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ProcessError::from(err);
        assert!(matches!(err, ProcessError::Malformed(_)));
        assert!(!err.is_retriable());
    }
}
