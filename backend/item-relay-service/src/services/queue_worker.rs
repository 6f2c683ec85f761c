/// Queue worker
///
/// Polls one queue, hands each record to a `RecordHandler` and settles the
/// record according to the configured `FailurePolicy`. A failing record never
/// stops the rest of its batch.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::RecordHandler;
use crate::metrics;
use crate::queue::{MessageQueue, QueueMessage, QueueResult};

/// What happens to a record whose processing failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Acknowledge and forget the record.
    #[default]
    Drop,
    /// Release retriable failures for redelivery until the receive limit.
    Retry,
    /// Move every failed record to the dead-letter queue.
    DeadLetter,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(FailurePolicy::Drop),
            "retry" => Ok(FailurePolicy::Retry),
            "dead_letter" | "dead-letter" | "deadletter" => Ok(FailurePolicy::DeadLetter),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Drop => write!(f, "drop"),
            FailurePolicy::Retry => write!(f, "retry"),
            FailurePolicy::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub policy: FailurePolicy,
    pub max_receive_count: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            poll_interval: Duration::from_millis(1000),
            policy: FailurePolicy::Drop,
            max_receive_count: 3,
        }
    }
}

/// How a failed record was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dropped,
    Released,
    DeadLettered,
    /// Release failed; the record stays in flight until recovery requeues it.
    Stranded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub message_id: String,
    pub error: String,
    pub retriable: bool,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub succeeded: usize,
    pub failures: Vec<RecordFailure>,
}

impl BatchReport {
    /// True when no record was handed back for redelivery or left in flight.
    pub fn reported_success(&self) -> bool {
        self.failures.iter().all(|f| {
            !matches!(
                f.disposition,
                Disposition::Released | Disposition::Stranded
            )
        })
    }
}

pub struct QueueWorker {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn RecordHandler>,
    dead_letter: Option<Arc<dyn MessageQueue>>,
    settings: WorkerSettings,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn RecordHandler>,
        dead_letter: Option<Arc<dyn MessageQueue>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            dead_letter,
            settings,
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            handler = self.handler.name(),
            batch_size = self.settings.batch_size,
            policy = %self.settings.policy,
            "Queue worker starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(report) => report.received == 0,
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "Failed to receive from queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), handler = self.handler.name(), "Queue worker stopped");
    }

    /// Receive and process one batch.
    pub async fn poll_once(&self) -> QueueResult<BatchReport> {
        let messages = self.queue.receive(self.settings.batch_size).await?;
        let mut report = BatchReport {
            received: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match self.handler.handle(&message.body).await {
                Ok(()) => {
                    report.succeeded += 1;
                    metrics::record_outcome(self.handler.name(), "success");
                    self.ack(message).await;
                }
                Err(e) => {
                    let retriable = e.is_retriable();
                    let disposition = self.settle_failure(message, retriable).await;
                    metrics::record_outcome(self.handler.name(), disposition_label(disposition));
                    report.failures.push(RecordFailure {
                        message_id: message.message_id.clone(),
                        error: e.to_string(),
                        retriable,
                        disposition,
                    });
                }
            }
        }

        if report.received > 0 {
            debug!(
                queue = %self.queue.name(),
                received = report.received,
                succeeded = report.succeeded,
                failed = report.failures.len(),
                "Batch processed"
            );
        }
        Ok(report)
    }

    fn choose_disposition(&self, message: &QueueMessage, retriable: bool) -> Disposition {
        let fallback = if self.dead_letter.is_some() {
            Disposition::DeadLettered
        } else {
            Disposition::Dropped
        };

        match self.settings.policy {
            FailurePolicy::Drop => Disposition::Dropped,
            FailurePolicy::Retry => {
                if retriable && message.receive_count < self.settings.max_receive_count {
                    Disposition::Released
                } else {
                    fallback
                }
            }
            FailurePolicy::DeadLetter => fallback,
        }
    }

    async fn settle_failure(&self, message: &QueueMessage, retriable: bool) -> Disposition {
        match self.choose_disposition(message, retriable) {
            Disposition::Dropped => {
                warn!(message_id = %message.message_id, "Dropping failed record");
                self.ack(message).await;
                Disposition::Dropped
            }
            Disposition::Released | Disposition::Stranded => self.release(message).await,
            Disposition::DeadLettered => {
                let Some(dlq) = &self.dead_letter else {
                    self.ack(message).await;
                    return Disposition::Dropped;
                };

                match dlq.send(message.body.clone()).await {
                    Ok(()) => {
                        warn!(
                            message_id = %message.message_id,
                            dead_letter_queue = %dlq.name(),
                            "Moved failed record to dead-letter queue"
                        );
                        self.ack(message).await;
                        Disposition::DeadLettered
                    }
                    Err(e) => {
                        error!(
                            message_id = %message.message_id,
                            error = %e,
                            "Failed to dead-letter record, releasing it instead"
                        );
                        self.release(message).await
                    }
                }
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.ack(message).await {
            error!(message_id = %message.message_id, error = %e, "Failed to ack record");
        }
    }

    async fn release(&self, message: &QueueMessage) -> Disposition {
        match self.queue.release(message).await {
            Ok(()) => {
                info!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    "Released record for redelivery"
                );
                Disposition::Released
            }
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    queue = %self.queue.name(),
                    error = %e,
                    "Failed to release record; stranded in flight"
                );
                Disposition::Stranded
            }
        }
    }
}

fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Dropped => "dropped",
        Disposition::Released => "released",
        Disposition::DeadLettered => "dead_lettered",
        Disposition::Stranded => "stranded",
    }
}
