use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error, info, warn};

use super::{Envelope, MessageQueue, QueueError, QueueMessage, QueueResult};

/// Removes ARGV[1] from KEYS[1] and pushes ARGV[2] onto KEYS[2] in one step.
/// Returns 0 without pushing when the entry is not in KEYS[1].
static MOVE_ENTRY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 1 then
            redis.call('LPUSH', KEYS[2], ARGV[2])
            return 1
        end
        return 0
        "#,
    )
});

pub(crate) fn in_flight_key(name: &str) -> String {
    format!("{}:inflight", name)
}

pub(crate) fn undecodable_key(name: &str) -> String {
    format!("{}:undecodable", name)
}

/// Turn a raw in-flight entry into a delivery; the raw text is the receipt.
pub(crate) fn decode_delivery(raw: String) -> Result<QueueMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(&raw)?;
    Ok(QueueMessage {
        message_id: envelope.id,
        body: envelope.body,
        receive_count: envelope.receive_count + 1,
        receipt: raw,
    })
}

/// Envelope pushed back on release, carrying the deliveries so far.
pub(crate) fn redelivery_payload(message: &QueueMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope {
        id: message.message_id.clone(),
        body: message.body.clone(),
        receive_count: message.receive_count,
    })
}

/// Redis list queue using the reliable-queue pattern
///
/// `send` pushes onto `<name>`; `receive` moves entries atomically onto
/// `<name>:inflight` with RPOPLPUSH, so a crashed consumer never loses them.
/// `ack` removes the in-flight entry, `release` moves it back with its
/// delivery count bumped in a single script call. Entries that cannot be
/// decoded are parked on `<name>:undecodable` instead of failing the batch.
#[derive(Clone)]
pub struct RedisQueue {
    name: String,
    in_flight_key: String,
    undecodable_key: String,
    conn: ConnectionManager,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            in_flight_key: in_flight_key(&name),
            undecodable_key: undecodable_key(&name),
            name,
            conn,
        }
    }

    /// Move everything left in flight by a previous process back to pending.
    pub async fn recover_in_flight(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;

        loop {
            let moved: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(&self.in_flight_key)
                .arg(&self.name)
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(queue = %self.name, recovered, "Recovered in-flight messages");
        }
        Ok(recovered)
    }

    async fn remove_in_flight(&self, receipt: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(&self.in_flight_key)
            .arg(1)
            .arg(receipt)
            .query_async(&mut conn)
            .await?;

        if removed == 0 {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        }
        Ok(())
    }

    /// Atomically replace in-flight `receipt` with `payload` on `destination`.
    async fn move_in_flight(
        &self,
        receipt: &str,
        destination: &str,
        payload: &str,
    ) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let moved: i64 = MOVE_ENTRY
            .key(&self.in_flight_key)
            .key(destination)
            .arg(receipt)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        if moved == 0 {
            return Err(QueueError::UnknownReceipt(receipt.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> QueueResult<()> {
        let payload = serde_json::to_string(&Envelope::new(body))?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.name)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn receive(&self, max_messages: usize) -> QueueResult<Vec<QueueMessage>> {
        let mut conn = self.conn.clone();
        let mut batch = Vec::new();

        while batch.len() < max_messages {
            let popped: redis::RedisResult<Option<String>> = redis::cmd("RPOPLPUSH")
                .arg(&self.name)
                .arg(&self.in_flight_key)
                .query_async(&mut conn)
                .await;

            let raw = match popped {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                // Entries already moved stay in flight; hand them out rather than strand them.
                Err(e) if !batch.is_empty() => {
                    warn!(
                        queue = %self.name,
                        received = batch.len(),
                        error = %e,
                        "Receive interrupted, returning partial batch"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            match decode_delivery(raw.clone()) {
                Ok(message) => batch.push(message),
                Err(e) => {
                    error!(
                        queue = %self.name,
                        destination = %self.undecodable_key,
                        error = %e,
                        "Undecodable queue entry, parking it"
                    );
                    if let Err(e) = self.move_in_flight(&raw, &self.undecodable_key, &raw).await {
                        error!(
                            queue = %self.name,
                            error = %e,
                            "Failed to park undecodable entry; it stays in flight"
                        );
                    }
                }
            }
        }

        if !batch.is_empty() {
            debug!(queue = %self.name, count = batch.len(), "Received messages");
        }
        Ok(batch)
    }

    async fn ack(&self, message: &QueueMessage) -> QueueResult<()> {
        self.remove_in_flight(&message.receipt).await
    }

    async fn release(&self, message: &QueueMessage) -> QueueResult<()> {
        let payload = redelivery_payload(message)?;
        self.move_in_flight(&message.receipt, &self.name, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_derive_from_queue_name() {
        assert_eq!(in_flight_key("ops"), "ops:inflight");
        assert_eq!(undecodable_key("ops"), "ops:undecodable");
    }

    #[test]
    fn test_decode_counts_this_delivery() {
        let raw = r#"{"id":"m-1","body":"{\"a\":1}","receiveCount":2}"#.to_string();
        let message = decode_delivery(raw.clone()).unwrap();

        assert_eq!(message.message_id, "m-1");
        assert_eq!(message.body, r#"{"a":1}"#);
        assert_eq!(message.receive_count, 3);
        assert_eq!(message.receipt, raw);
    }

    #[test]
    fn test_decode_rejects_foreign_entries() {
        assert!(decode_delivery("not an envelope".to_string()).is_err());
        assert!(decode_delivery(r#"{"body":"x"}"#.to_string()).is_err());
    }

    #[test]
    fn test_redelivery_keeps_identity_and_count() {
        let message = decode_delivery(
            r#"{"id":"m-1","body":"payload","receiveCount":0}"#.to_string(),
        )
        .unwrap();

        let payload = redelivery_payload(&message).unwrap();
        let again = decode_delivery(payload.clone()).unwrap();

        assert_eq!(again.message_id, "m-1");
        assert_eq!(again.body, "payload");
        assert_eq!(again.receive_count, 2);
        assert_ne!(payload, message.receipt);
    }
}
