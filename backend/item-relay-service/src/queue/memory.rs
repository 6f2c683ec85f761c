use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Envelope, MessageQueue, QueueError, QueueMessage, QueueResult};

#[derive(Default)]
struct Inner {
    pending: VecDeque<Envelope>,
    in_flight: HashMap<String, Envelope>,
}

/// Process-local queue with the same ack/release contract as the Redis one
pub struct InMemoryQueue {
    name: String,
    inner: Mutex<Inner>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Bodies waiting for delivery, oldest first
    pub async fn pending_bodies(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.pending.iter().map(|e| e.body.clone()).collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> QueueResult<()> {
        self.inner.lock().await.pending.push_back(Envelope::new(body));
        Ok(())
    }

    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<QueueMessage>> {
        let mut inner = self.inner.lock().await;
        let mut batch = Vec::new();

        while batch.len() < max_messages {
            let Some(mut envelope) = inner.pending.pop_front() else {
                break;
            };
            envelope.receive_count += 1;

            batch.push(QueueMessage {
                message_id: envelope.id.clone(),
                body: envelope.body.clone(),
                receive_count: envelope.receive_count,
                receipt: envelope.id.clone(),
            });
            inner.in_flight.insert(envelope.id.clone(), envelope);
        }

        Ok(batch)
    }

    async fn ack(&self, message: &QueueMessage) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .in_flight
            .remove(&message.receipt)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownReceipt(message.receipt.clone()))
    }

    async fn release(&self, message: &QueueMessage) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let envelope = inner
            .in_flight
            .remove(&message.receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(message.receipt.clone()))?;
        inner.pending.push_back(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_respects_batch_size() {
        let queue = InMemoryQueue::new("ops");
        for i in 0..3 {
            queue.send(format!("m{}", i)).await.unwrap();
        }

        let batch = queue.receive(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].body, "m0");
        assert_eq!(queue.pending_len().await, 1);
        assert_eq!(queue.in_flight_len().await, 2);
    }

    #[tokio::test]
    async fn test_ack_removes_in_flight() {
        let queue = InMemoryQueue::new("ops");
        queue.send("m".to_string()).await.unwrap();

        let batch = queue.receive(1).await.unwrap();
        queue.ack(&batch[0]).await.unwrap();

        assert_eq!(queue.in_flight_len().await, 0);
        assert!(queue.receive(1).await.unwrap().is_empty());
        assert!(queue.ack(&batch[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_release_redelivers_with_higher_count() {
        let queue = InMemoryQueue::new("ops");
        queue.send("m".to_string()).await.unwrap();

        let first = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(first.receive_count, 1);
        queue.release(&first).await.unwrap();

        let second = queue.receive(1).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.receive_count, 2);
    }
}
