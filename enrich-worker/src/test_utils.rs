use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time;

use async_trait::async_trait;
use enrich_common::pgqueue::{
    Acknowledge, AckedDelivery, DatabaseError, DiscardedDelivery, RequeueError,
    RequeueInvalidError, RequeuedDelivery,
};
use enrich_common::records::{AddressResult, EnrichedRecord, UserRecord, ValidationResult};
use enrich_common::store::{RecordStore, StoreError};
use reqwest::StatusCode;
use url::Url;
use uuid::Uuid;

use crate::clients::{AddressResolver, DocumentValidator, LookupError};

pub fn ana() -> UserRecord {
    UserRecord {
        name: "Ana".to_owned(),
        document_number: "12345678900".to_owned(),
        postal_code: "01310-100".to_owned(),
    }
}

pub fn paulista() -> AddressResult {
    AddressResult {
        street: "Av. Paulista".to_owned(),
        city: "São Paulo".to_owned(),
        state: "SP".to_owned(),
        postal_code: "01310-100".to_owned(),
    }
}

/// A collaborator response with an error status.
#[derive(Clone, Copy, Debug)]
pub struct Failure {
    status: u16,
    retry_after: Option<u64>,
}

pub fn failing(status: u16, retry_after_secs: Option<u64>) -> Failure {
    Failure {
        status,
        retry_after: retry_after_secs,
    }
}

impl Failure {
    fn error(&self) -> LookupError {
        LookupError::StatusError {
            url: Url::parse("http://collaborator.test/").unwrap(),
            status: StatusCode::from_u16(self.status).unwrap(),
            retry_after: self.retry_after.map(time::Duration::from_secs),
        }
    }
}

pub struct FixedValidator {
    outcome: Result<bool, Failure>,
    calls: Arc<AtomicUsize>,
}

impl FixedValidator {
    pub fn valid(is_valid: bool) -> Self {
        Self {
            outcome: Ok(is_valid),
            calls: Arc::default(),
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            outcome: Err(failure),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl DocumentValidator for FixedValidator {
    async fn validate(&self, _document_number: &str) -> Result<ValidationResult, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(is_valid) => Ok(ValidationResult {
                is_valid: *is_valid,
            }),
            Err(failure) => Err(failure.error()),
        }
    }
}

pub struct FixedResolver {
    outcome: Result<AddressResult, Failure>,
    calls: Arc<AtomicUsize>,
}

impl FixedResolver {
    pub fn found(address: AddressResult) -> Self {
        Self {
            outcome: Ok(address),
            calls: Arc::default(),
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            outcome: Err(failure),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl AddressResolver for FixedResolver {
    async fn resolve(&self, _postal_code: &str) -> Result<AddressResult, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(address) => Ok(address.clone()),
            Err(failure) => Err(failure.error()),
        }
    }
}

#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<Vec<EnrichedRecord>>,
}

impl RecordingStore {
    pub fn saved(&self) -> Vec<EnrichedRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn save(&self, record: &EnrichedRecord) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        self.records
            .lock()
            .unwrap()
            .push(record.clone().with_id(id));
        Ok(id)
    }

    async fn find_all(&self) -> Result<Vec<EnrichedRecord>, StoreError> {
        Ok(self.saved())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EnrichedRecord>, StoreError> {
        Ok(self.saved().into_iter().find(|r| r.id == Some(id)))
    }
}

/// A store that is reachable but fails every call.
pub struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn save(&self, _record: &EnrichedRecord) -> Result<Uuid, StoreError> {
        Err(StoreError::Timeout {
            command: "INSERT".to_owned(),
            timeout: time::Duration::from_secs(5),
        })
    }

    async fn find_all(&self) -> Result<Vec<EnrichedRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<EnrichedRecord>, StoreError> {
        Err(StoreError::Unavailable)
    }
}

/// How a `FakeDelivery` was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Acked,
    Requeued {
        error: serde_json::Value,
        retry_interval: time::Duration,
    },
    Discarded {
        error: serde_json::Value,
    },
}

/// A delivery that records its settlement instead of touching a queue.
#[derive(Debug)]
pub struct FakeDelivery {
    pub payload: Vec<u8>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl FakeDelivery {
    pub fn new(payload: &[u8], attempt: i32, max_attempts: i32) -> Self {
        Self {
            payload: payload.to_vec(),
            attempt,
            max_attempts,
            settlements: Arc::default(),
        }
    }

    pub fn json(record: &UserRecord, attempt: i32, max_attempts: i32) -> Self {
        Self::new(
            &serde_json::to_vec(record).unwrap(),
            attempt,
            max_attempts,
        )
    }

    fn settle(&self, settlement: Settlement) {
        self.settlements.lock().unwrap().push(settlement);
    }
}

#[async_trait]
impl Acknowledge for FakeDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn attempt(&self) -> i32 {
        self.attempt
    }

    fn queue(&self) -> &str {
        "fake"
    }

    async fn ack(self) -> Result<AckedDelivery, DatabaseError> {
        self.settle(Settlement::Acked);
        Ok(AckedDelivery {
            id: 1,
            queue: "fake".to_owned(),
        })
    }

    async fn requeue<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        self,
        error: E,
        retry_interval: time::Duration,
    ) -> Result<RequeuedDelivery, RequeueError<Self>> {
        if self.attempt >= self.max_attempts {
            return Err(RequeueError::from(RequeueInvalidError {
                delivery: self,
                error: "Maximum attempts reached".to_owned(),
            }));
        }

        self.settle(Settlement::Requeued {
            error: serde_json::to_value(&error).unwrap(),
            retry_interval,
        });
        Ok(RequeuedDelivery {
            id: 1,
            queue: "fake".to_owned(),
            retry_interval,
        })
    }

    async fn discard<E: serde::Serialize + std::marker::Sync + std::marker::Send>(
        self,
        error: E,
    ) -> Result<DiscardedDelivery<E>, DatabaseError> {
        self.settle(Settlement::Discarded {
            error: serde_json::to_value(&error).unwrap(),
        });
        Ok(DiscardedDelivery {
            id: 1,
            queue: "fake".to_owned(),
            error: sqlx::types::Json(error),
        })
    }
}
