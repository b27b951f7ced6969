//! # PgQueue
//!
//! A durable message queue backed by a PostgreSQL table, with at-least-once delivery.
//!
//! Every `Delivery` holds the transaction it was received in. Settling the delivery (ack,
//! requeue or discard) commits that transaction; dropping it unsettled rolls the transaction
//! back and the message becomes available again for any consumer.
use std::fmt;
use std::str::FromStr;
use std::time;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;

/// Content type of JSON encoded payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Enumeration of parsing errors in PgQueue.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not a valid DeliveryStatus")]
    ParseDeliveryStatusError(String),
}

/// Enumeration of database-related errors in PgQueue.
/// Errors that can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("pool creation failed with: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("{command} timed out after {timeout:?}")]
    TimeoutError {
        command: String,
        timeout: time::Duration,
    },
}

/// An error that occurs when a delivery cannot be requeued.
/// Returns the underlying delivery so that a client can discard it.
#[derive(Error, Debug)]
#[error("requeue is an invalid state for this delivery: {error}")]
pub struct RequeueInvalidError<T> {
    pub delivery: T,
    pub error: String,
}

/// Enumeration of errors that can occur when requeueing a delivery.
/// They are in a separate enum as a failed requeue could be returning the underlying delivery.
#[derive(Error, Debug)]
pub enum RequeueError<T> {
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
    #[error(transparent)]
    RequeueInvalidError(#[from] RequeueInvalidError<T>),
}

/// Enumeration of possible statuses for a queued message.
#[derive(Debug, PartialEq, Eq, Clone, Copy, sqlx::Type)]
#[sqlx(type_name = "delivery_status")]
#[sqlx(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Waiting in the queue to be delivered, possibly after a scheduled delay.
    Available,
    /// Rejected without requeue. Kept with its errors as a dead letter.
    Discarded,
}

/// Allow casting DeliveryStatus from strings.
impl FromStr for DeliveryStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(DeliveryStatus::Available),
            "discarded" => Ok(DeliveryStatus::Discarded),
            invalid => Err(ParseError::ParseDeliveryStatusError(invalid.to_owned())),
        }
    }
}

/// A message as read from the queue table.
#[derive(sqlx::FromRow, Debug)]
pub struct Message {
    /// A unique id identifying a message. Serves as the delivery tag.
    pub id: i64,
    /// The current delivery attempt, starting at 1 on first delivery.
    pub attempt: i32,
    /// Consumer tags that received this message, one per attempt.
    pub attempted_by: Vec<String>,
    /// When this message was enqueued.
    pub created_at: chrono::DateTime<chrono::offset::Utc>,
    /// Deliveries allowed before a requeue turns into a discard.
    pub max_attempts: i32,
    /// The content type the payload was published with.
    pub content_type: String,
    /// The raw payload, decoded by the consumer.
    pub payload: Vec<u8>,
    /// The queue this message belongs to.
    pub queue: String,
    /// The current status of the message.
    pub status: DeliveryStatus,
}

impl Message {
    /// Return true if this delivery attempt is greater or equal to the maximum number of attempts.
    pub fn is_gte_max_attempts(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// A message to be published into a `PgQueue`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content_type: String,
    pub payload: Vec<u8>,
    pub max_attempts: i32,
}

impl NewMessage {
    pub fn new(content_type: &str, payload: Vec<u8>, max_attempts: i32) -> Self {
        Self {
            content_type: content_type.to_owned(),
            payload,
            max_attempts,
        }
    }

    /// Encode `value` as a JSON payload.
    pub fn json<T: serde::Serialize>(
        value: &T,
        max_attempts: i32,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(CONTENT_TYPE_JSON, payload, max_attempts))
    }
}

/// State a delivery is transitioned to after a positive acknowledgment.
/// The underlying message no longer exists in the queue.
#[derive(Debug)]
pub struct AckedDelivery {
    pub id: i64,
    pub queue: String,
}

/// State a delivery is transitioned to after being returned to the queue.
#[derive(Debug)]
pub struct RequeuedDelivery {
    pub id: i64,
    pub queue: String,
    pub retry_interval: time::Duration,
}

/// State a delivery is transitioned to after being rejected without requeue.
#[derive(Debug)]
pub struct DiscardedDelivery<E> {
    pub id: i64,
    pub queue: String,
    pub error: sqlx::types::Json<E>,
}

/// Settlement of a single delivery. Each method consumes the delivery, so a delivery is settled
/// at most once and never on behalf of another.
#[async_trait]
pub trait Acknowledge: Sized + Send {
    fn payload(&self) -> &[u8];

    fn attempt(&self) -> i32;

    fn queue(&self) -> &str;

    /// Positively acknowledge: the message is removed from the queue.
    async fn ack(self) -> Result<AckedDelivery, DatabaseError>;

    /// Negatively acknowledge with requeue: the message is delivered again after `retry_interval`.
    /// Fails with `RequeueInvalidError` when the message has no attempts left.
    async fn requeue<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        self,
        error: E,
        retry_interval: time::Duration,
    ) -> Result<RequeuedDelivery, RequeueError<Self>>;

    /// Negatively acknowledge without requeue: the message is never delivered again.
    async fn discard<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        self,
        error: E,
    ) -> Result<DiscardedDelivery<E>, DatabaseError>;
}

/// A message received from a `PgQueue`, together with the open transaction that locks it.
pub struct Delivery {
    pub message: Message,
    txn: sqlx::Transaction<'static, sqlx::postgres::Postgres>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Delivery {
    pub fn tag(&self) -> i64 {
        self.message.id
    }

    async fn commit(self, command: &str) -> Result<(), DatabaseError> {
        self.txn
            .commit()
            .await
            .map_err(|error| DatabaseError::TransactionError {
                command: format!("COMMIT after {command}"),
                error,
            })
    }
}

#[async_trait]
impl Acknowledge for Delivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> i32 {
        self.message.attempt
    }

    fn queue(&self) -> &str {
        &self.message.queue
    }

    async fn ack(mut self) -> Result<AckedDelivery, DatabaseError> {
        let base_query = r#"
DELETE FROM
    delivery_queue
WHERE
    queue = $1
    AND id = $2
        "#;

        sqlx::query(base_query)
            .bind(&self.message.queue)
            .bind(self.message.id)
            .execute(&mut *self.txn)
            .await
            .map_err(|error| DatabaseError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        let acked = AckedDelivery {
            id: self.message.id,
            queue: self.message.queue.clone(),
        };
        self.commit("DELETE").await?;

        Ok(acked)
    }

    async fn requeue<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        mut self,
        error: E,
        retry_interval: time::Duration,
    ) -> Result<RequeuedDelivery, RequeueError<Self>> {
        if self.message.is_gte_max_attempts() {
            return Err(RequeueError::from(RequeueInvalidError {
                delivery: self,
                error: "Maximum attempts reached".to_owned(),
            }));
        }

        let json_error = sqlx::types::Json(error);
        let base_query = r#"
UPDATE
    delivery_queue
SET
    last_attempt_finished_at = NOW(),
    status = 'available'::delivery_status,
    scheduled_at = NOW() + $3,
    errors = array_append(errors, $4)
WHERE
    queue = $1
    AND id = $2
        "#;

        sqlx::query(base_query)
            .bind(&self.message.queue)
            .bind(self.message.id)
            .bind(retry_interval)
            .bind(&json_error)
            .execute(&mut *self.txn)
            .await
            .map_err(|error| DatabaseError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        let requeued = RequeuedDelivery {
            id: self.message.id,
            queue: self.message.queue.clone(),
            retry_interval,
        };
        self.commit("UPDATE").await?;

        Ok(requeued)
    }

    async fn discard<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        mut self,
        error: E,
    ) -> Result<DiscardedDelivery<E>, DatabaseError> {
        let json_error = sqlx::types::Json(error);
        let base_query = r#"
UPDATE
    delivery_queue
SET
    last_attempt_finished_at = NOW(),
    status = 'discarded'::delivery_status,
    errors = array_append(errors, $3)
WHERE
    queue = $1
    AND id = $2
        "#;

        sqlx::query(base_query)
            .bind(&self.message.queue)
            .bind(self.message.id)
            .bind(&json_error)
            .execute(&mut *self.txn)
            .await
            .map_err(|error| DatabaseError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        let id = self.message.id;
        let queue = self.message.queue.clone();
        self.commit("UPDATE").await?;

        Ok(DiscardedDelivery {
            id,
            queue,
            error: json_error,
        })
    }
}

/// A queue implemented on top of a PostgreSQL table.
#[derive(Clone)]
pub struct PgQueue {
    /// A name to identify this PgQueue as multiple may share a table.
    name: String,
    /// A connection pool used to connect to the PostgreSQL database.
    pool: PgPool,
}

pub type PgQueueResult<T> = std::result::Result<T, DatabaseError>;

impl PgQueue {
    /// Connect a new PgQueue to the database in `url`. Fails if the database cannot be reached.
    ///
    /// # Arguments
    ///
    /// * `queue_name`: A name for the queue we are going to initialize.
    /// * `url`: A URL pointing to where the PostgreSQL database is hosted.
    /// * `max_connections`: Size of the connection pool owned by this queue.
    /// * `app_name`: Reported to PostgreSQL as the application name of every connection.
    pub async fn new(
        queue_name: &str,
        url: &str,
        max_connections: u32,
        app_name: &'static str,
    ) -> PgQueueResult<Self> {
        let name = queue_name.to_owned();
        let options = PgConnectOptions::from_str(url)
            .map_err(|error| DatabaseError::PoolCreationError { error })?
            .application_name(app_name);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|error| DatabaseError::ConnectionError { error })?;

        Ok(Self { name, pool })
    }

    /// Initialize a new PgQueue from a provided connection pool.
    pub fn new_from_pool(queue_name: &str, pool: PgPool) -> PgQueue {
        let name = queue_name.to_owned();

        Self { name, pool }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a `NewMessage` into this PgQueue.
    /// The insert is committed only if it completes within `timeout`, otherwise nothing is enqueued.
    pub async fn publish(&self, message: NewMessage, timeout: time::Duration) -> PgQueueResult<()> {
        tokio::time::timeout(timeout, self.publish_committed(message))
            .await
            .map_err(|_| DatabaseError::TimeoutError {
                command: "INSERT".to_owned(),
                timeout,
            })?
    }

    async fn publish_committed(&self, message: NewMessage) -> PgQueueResult<()> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|error| DatabaseError::ConnectionError { error })?;

        let base_query = r#"
INSERT INTO delivery_queue
    (attempt, content_type, created_at, max_attempts, payload, queue, scheduled_at, status)
VALUES
    (0, $1, NOW(), $2, $3, $4, NOW(), 'available'::delivery_status)
        "#;

        sqlx::query(base_query)
            .bind(&message.content_type)
            .bind(message.max_attempts)
            .bind(&message.payload)
            .bind(&self.name)
            .execute(&mut *txn)
            .await
            .map_err(|error| DatabaseError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        txn.commit()
            .await
            .map_err(|error| DatabaseError::TransactionError {
                command: "COMMIT".to_owned(),
                error,
            })
    }

    /// Receive the next available message from this PgQueue, if any.
    /// The message stays locked by the returned `Delivery` until it is settled or dropped.
    pub async fn receive(&self, consumer_tag: &str) -> PgQueueResult<Option<Delivery>> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|error| DatabaseError::ConnectionError { error })?;

        // The query that follows uses a FOR UPDATE SKIP LOCKED clause.
        // For more details on this see: 2ndquadrant.com/en/blog/what-is-select-skip-locked-for-in-postgresql-9-5.
        let base_query = r#"
WITH next_in_queue AS (
    SELECT
        id
    FROM
        delivery_queue
    WHERE
        status = 'available'
        AND scheduled_at <= NOW()
        AND queue = $1
    ORDER BY
        scheduled_at,
        id
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE
    delivery_queue
SET
    attempted_at = NOW(),
    attempt = delivery_queue.attempt + 1,
    attempted_by = array_append(delivery_queue.attempted_by, $2::text)
FROM
    next_in_queue
WHERE
    delivery_queue.id = next_in_queue.id
RETURNING
    delivery_queue.id,
    delivery_queue.attempt,
    delivery_queue.attempted_by,
    delivery_queue.created_at,
    delivery_queue.max_attempts,
    delivery_queue.content_type,
    delivery_queue.payload,
    delivery_queue.queue,
    delivery_queue.status
        "#;

        let message: Option<Message> = sqlx::query_as(base_query)
            .bind(&self.name)
            .bind(consumer_tag)
            .fetch_optional(&mut *txn)
            .await
            .map_err(|error| DatabaseError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        // An empty queue drops the transaction, rolling it back.
        Ok(message.map(|message| Delivery { message, txn }))
    }

    /// Check the broker is reachable right now.
    pub async fn is_connected(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }

        let ping = sqlx::query("SELECT 1").execute(&self.pool);
        matches!(
            tokio::time::timeout(time::Duration::from_secs(1), ping).await,
            Ok(Ok(_))
        )
    }

    /// Close every connection owned by this queue. Unsettled deliveries are rolled back.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
