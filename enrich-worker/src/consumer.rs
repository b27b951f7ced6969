//! Consume user records from a `PgQueue` and settle each delivery according to the pipeline verdict.
use std::sync::Arc;
use std::time;

use enrich_common::pgqueue::{Acknowledge, Delivery, PgQueue, RequeueError, RequeueInvalidError};
use enrich_common::records::{DeliveryError, DeliveryErrorType, UserRecord};
use enrich_common::retry::RetryPolicy;
use enrich_common::store::RecordStore;
use health::{ComponentStatus, HealthHandle};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::{build_http_client, HttpAddressResolver, HttpDocumentValidator};
use crate::config::ConsumerConfig;
use crate::error::ConsumerError;
use crate::pipeline::Pipeline;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed and removed from the queue.
    Acked,
    /// Failed, returned to the queue to be delivered again after the interval.
    Requeued(time::Duration),
    /// Could not be decoded, never delivered again.
    Discarded,
    /// Failed on its last allowed attempt, never delivered again.
    DeadLettered,
}

pub struct Consumer {
    /// An identifier for this consumer. Recorded on every message it receives.
    tag: String,
    /// The queue we will be receiving deliveries from.
    queue: PgQueue,
    pipeline: Pipeline,
    retry_policy: RetryPolicy,
    /// The interval for polling the queue when it is empty.
    poll_interval: time::Duration,
    /// Maximum number of unsettled deliveries held at once.
    prefetch_count: usize,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl Consumer {
    pub fn new(
        tag: &str,
        queue: PgQueue,
        pipeline: Pipeline,
        retry_policy: RetryPolicy,
        poll_interval: time::Duration,
        prefetch_count: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            tag: tag.to_owned(),
            queue,
            pipeline,
            retry_policy,
            poll_interval,
            prefetch_count: prefetch_count.max(1),
            liveness,
        }
    }

    /// Build a consumer calling the HTTP collaborators in `config`.
    pub fn from_config(
        config: &ConsumerConfig,
        queue: PgQueue,
        store: Arc<dyn RecordStore>,
        liveness: HealthHandle,
    ) -> Result<Self, ConsumerError> {
        let client = build_http_client(config.external_api_timeout.0)?;
        let validator =
            HttpDocumentValidator::new(client.clone(), Url::parse(&config.document_validation_url)?);
        let resolver = HttpAddressResolver::new(client, Url::parse(&config.address_service_url)?);
        let pipeline = Pipeline::new(Arc::new(validator), Arc::new(resolver), store);

        let retry_policy = RetryPolicy::new(
            config.retry_policy.backoff_coefficient,
            config.retry_policy.initial_interval.0,
            config.retry_policy.maximum_interval.0,
        );

        Ok(Self::new(
            config.consumer_tag.as_str(),
            queue,
            pipeline,
            retry_policy,
            config.poll_interval.0,
            config.prefetch_count,
            liveness,
        ))
    }

    /// Wait until a delivery becomes available in our queue.
    async fn wait_for_delivery(&self) -> Delivery {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            match self.queue.receive(&self.tag).await {
                Ok(Some(delivery)) => {
                    self.liveness.report_healthy().await;
                    return delivery;
                }
                Ok(None) => self.liveness.report_healthy().await,
                // Liveness is not reported: a broker that stays down stalls the consumer.
                Err(error) => error!("failed to receive from {}: {}", self.queue.name(), error),
            }
        }
    }

    /// Wait for a free prefetch slot, reporting liveness while every slot is taken.
    async fn acquire_permit(
        &self,
        semaphore: Arc<Semaphore>,
    ) -> Result<OwnedSemaphorePermit, ConsumerError> {
        let acquire = semaphore.acquire_owned();
        tokio::pin!(acquire);
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                permit = &mut acquire => {
                    return permit.map_err(|_| ConsumerError::SemaphoreClosed);
                }
                _ = interval.tick() => self.liveness.report_healthy().await,
            }
        }
    }

    /// Consume until `shutdown` is cancelled. In-flight deliveries are then abandoned unsettled,
    /// so the broker delivers them again, and the queue connections are closed.
    /// Liveness is reported unhealthy once the consumer stops, for whatever reason.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let result = self.consume(&shutdown).await;
        self.liveness.report_status(ComponentStatus::Unhealthy).await;
        self.queue.close().await;
        info!(queue = self.queue.name(), "consumer stopped");

        result
    }

    async fn consume(&self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        let semaphore = Arc::new(Semaphore::new(self.prefetch_count));
        let mut tasks = JoinSet::new();
        let labels = [("queue", self.queue.name().to_owned())];

        info!(
            queue = self.queue.name(),
            tag = %self.tag,
            prefetch = self.prefetch_count,
            "consumer started"
        );

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(error) = result {
                    error!("delivery task failed: {}", error);
                }
            }

            metrics::gauge!("consumer_saturation_percent", &labels).set(
                1f64 - semaphore.available_permits() as f64 / self.prefetch_count as f64,
            );

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.acquire_permit(semaphore.clone()) => permit?,
            };

            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.wait_for_delivery() => delivery,
            };

            let pipeline = self.pipeline.clone();
            let retry_policy = self.retry_policy;
            tasks.spawn(async move {
                let tag = delivery.tag();
                match handle_delivery(&pipeline, &retry_policy, delivery).await {
                    Ok(outcome) => debug!(tag, ?outcome, "settled delivery"),
                    Err(error) => error!(tag, "failed to settle delivery: {}", error),
                }
                drop(permit);
            });
        }

        if !tasks.is_empty() {
            warn!(
                in_flight = tasks.len(),
                "abandoning in-flight deliveries, they will be redelivered"
            );
        }
        tasks.shutdown().await;

        Ok(())
    }
}

/// Decode a delivery, run it through the pipeline and settle it:
/// - undecodable payloads are discarded without reaching the pipeline
/// - processed records are acked
/// - failed records are requeued with backoff, or dead-lettered on their last attempt
pub async fn handle_delivery<D: Acknowledge>(
    pipeline: &Pipeline,
    retry_policy: &RetryPolicy,
    delivery: D,
) -> Result<Outcome, ConsumerError> {
    let labels = [("queue", delivery.queue().to_owned())];
    metrics::counter!("deliveries_received_total", &labels).increment(1);

    let record: UserRecord = match serde_json::from_slice(delivery.payload()) {
        Ok(record) => record,
        Err(decode_error) => {
            error!("discarding delivery that is not a user record: {}", decode_error);
            delivery
                .discard(DeliveryError::new(
                    DeliveryErrorType::Decode,
                    &decode_error.to_string(),
                ))
                .await?;
            metrics::counter!("deliveries_discarded_total", &labels).increment(1);

            return Ok(Outcome::Discarded);
        }
    };

    let now = tokio::time::Instant::now();
    let result = pipeline.process(record).await;
    metrics::histogram!("delivery_processing_duration_seconds", &labels)
        .record(now.elapsed().as_secs_f64());

    match result {
        Ok(enriched) => {
            delivery.ack().await?;
            metrics::counter!("deliveries_acked_total", &labels).increment(1);
            info!(
                name = %enriched.source.name,
                document_valid = enriched.document_valid,
                "processed user record"
            );

            Ok(Outcome::Acked)
        }
        Err(pipeline_error) => {
            let attempt = delivery.attempt().max(0) as u32;
            let retry_interval =
                retry_policy.retry_interval(attempt, pipeline_error.retry_after());
            error!(attempt, "failed to process user record: {}", pipeline_error);

            match delivery
                .requeue(pipeline_error.delivery_error(), retry_interval)
                .await
            {
                Ok(_) => {
                    metrics::counter!("deliveries_requeued_total", &labels).increment(1);

                    Ok(Outcome::Requeued(retry_interval))
                }
                Err(RequeueError::RequeueInvalidError(RequeueInvalidError { delivery, .. })) => {
                    delivery.discard(pipeline_error.delivery_error()).await?;
                    metrics::counter!("deliveries_dead_lettered_total", &labels).increment(1);
                    warn!(attempt, "dead-lettered user record after its last attempt");

                    Ok(Outcome::DeadLettered)
                }
                Err(RequeueError::DatabaseError(error)) => Err(ConsumerError::from(error)),
            }
        }
    }
}
