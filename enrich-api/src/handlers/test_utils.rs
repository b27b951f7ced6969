use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use enrich_common::pgqueue::DatabaseError;
use enrich_common::publisher::{PublishError, Publisher};
use enrich_common::records::{EnrichedRecord, UserRecord};
use enrich_common::store::{RecordStore, StoreError};
use uuid::Uuid;

use super::AppState;

pub fn app_state(publisher: FakePublisher, store: MemoryStore) -> AppState {
    AppState {
        publisher: Arc::new(publisher),
        store: Arc::new(store),
    }
}

pub struct FakePublisher {
    connected: bool,
    published: Arc<Mutex<Vec<UserRecord>>>,
}

impl Default for FakePublisher {
    fn default() -> Self {
        Self {
            connected: true,
            published: Arc::default(),
        }
    }
}

impl FakePublisher {
    /// A publisher whose broker is down: every publish times out.
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Arc<Mutex<Vec<UserRecord>>> {
        self.published.clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, record: &UserRecord) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::QueueError(DatabaseError::TimeoutError {
                command: "INSERT".to_owned(),
                timeout: std::time::Duration::from_secs(5),
            }));
        }

        self.published.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }
}

/// In-memory records, or a store that fails every call when `failing`.
#[derive(Default)]
pub struct MemoryStore {
    records: Vec<EnrichedRecord>,
    failing: bool,
}

impl MemoryStore {
    pub fn with(records: Vec<EnrichedRecord>) -> Self {
        Self {
            records,
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            records: Vec::new(),
            failing: true,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save(&self, _record: &EnrichedRecord) -> Result<Uuid, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn find_all(&self) -> Result<Vec<EnrichedRecord>, StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable);
        }
        Ok(self.records.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EnrichedRecord>, StoreError> {
        if self.failing {
            return Err(StoreError::Unavailable);
        }
        Ok(self.records.iter().find(|r| r.id == Some(id)).cloned())
    }
}
