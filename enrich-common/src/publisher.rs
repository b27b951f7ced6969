//! # Publisher
//!
//! Durable enqueueing of user records for the enrichment consumers.
use std::time;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::pgqueue::{DatabaseError, NewMessage, PgQueue};
use crate::records::UserRecord;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to encode record: {0}")]
    EncodeError(#[from] serde_json::Error),
    #[error("failed to publish message: {0}")]
    QueueError(#[from] DatabaseError),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Enqueue a record. Returns once the message is durably stored, or fails with nothing enqueued.
    async fn publish(&self, record: &UserRecord) -> Result<(), PublishError>;

    /// Whether the broker can be reached right now.
    async fn is_connected(&self) -> bool;
}

/// Publisher writing into a `PgQueue`. Shares no connections with the consumer.
pub struct QueuePublisher {
    queue: PgQueue,
    timeout: time::Duration,
    max_attempts: i32,
}

impl QueuePublisher {
    pub fn new(queue: PgQueue, timeout: time::Duration, max_attempts: i32) -> Self {
        Self {
            queue,
            timeout,
            max_attempts,
        }
    }
}

#[async_trait]
impl Publisher for QueuePublisher {
    async fn publish(&self, record: &UserRecord) -> Result<(), PublishError> {
        let message = NewMessage::json(record, self.max_attempts)?;
        let size = message.payload.len();

        self.queue.publish(message, self.timeout).await?;

        debug!(queue = self.queue.name(), size, "published message");
        metrics::counter!("messages_published_total", &[("queue", self.queue.name().to_owned())])
            .increment(1);

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.queue.is_connected().await
    }
}
