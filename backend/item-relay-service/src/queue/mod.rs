/// Message queue collaborator
///
/// At-least-once delivery with explicit acknowledgement. A received message
/// stays in flight until it is acked (done) or released (visible again).
pub mod memory;
pub mod redis_queue;

pub use memory::InMemoryQueue;
pub use redis_queue::RedisQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown receipt {0}")]
    UnknownReceipt(String),
}

/// A delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    /// Number of deliveries including this one
    pub receive_count: u32,
    /// Opaque handle used to ack or release this delivery
    pub receipt: String,
}

/// Stored form of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub id: String,
    pub body: String,
    /// Deliveries so far
    pub receive_count: u32,
}

impl Envelope {
    pub fn new(body: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            receive_count: 0,
        }
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, body: String) -> QueueResult<()>;

    /// Receive up to `max_messages`; an empty vec means the queue is idle.
    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<QueueMessage>>;

    async fn ack(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Return an in-flight message to the queue for redelivery.
    async fn release(&self, message: &QueueMessage) -> QueueResult<()>;
}
