//! The enrichment pipeline: validate the document, resolve the address, persist the result.
use std::sync::Arc;
use std::time;

use enrich_common::records::{DeliveryError, DeliveryErrorType, EnrichedRecord, UserRecord};
use enrich_common::store::RecordStore;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clients::{AddressResolver, DocumentValidator, LookupError};

/// A failed lookup. Nothing was enriched nor persisted.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("document validation failed: {0}")]
    Validation(LookupError),
    #[error("address lookup failed: {0}")]
    AddressLookup(LookupError),
}

impl PipelineError {
    pub fn lookup_error(&self) -> &LookupError {
        match self {
            PipelineError::Validation(error) | PipelineError::AddressLookup(error) => error,
        }
    }

    pub fn retry_after(&self) -> Option<time::Duration> {
        self.lookup_error().retry_after()
    }

    /// The error recorded on the queued message when its delivery is nacked.
    pub fn delivery_error(&self) -> DeliveryError {
        let r#type = match self {
            PipelineError::Validation(_) => DeliveryErrorType::Validation,
            PipelineError::AddressLookup(_) => DeliveryErrorType::AddressLookup,
        };
        DeliveryError::new(r#type, &self.lookup_error().to_string())
    }
}

#[derive(Clone)]
pub struct Pipeline {
    validator: Arc<dyn DocumentValidator>,
    resolver: Arc<dyn AddressResolver>,
    store: Arc<dyn RecordStore>,
}

impl Pipeline {
    pub fn new(
        validator: Arc<dyn DocumentValidator>,
        resolver: Arc<dyn AddressResolver>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            validator,
            resolver,
            store,
        }
    }

    /// Enrich a single record. Persistence is best-effort: a record that could not be saved
    /// is still returned, without an id.
    pub async fn process(&self, record: UserRecord) -> Result<EnrichedRecord, PipelineError> {
        let validation = self
            .validator
            .validate(&record.document_number)
            .await
            .map_err(PipelineError::Validation)?;

        let address = self
            .resolver
            .resolve(&record.postal_code)
            .await
            .map_err(PipelineError::AddressLookup)?;

        let enriched = EnrichedRecord::processed(record, validation, address);

        if !self.store.is_available() {
            debug!("records store unavailable, skipping persistence");
            return Ok(enriched);
        }

        match self.store.save(&enriched).await {
            Ok(id) => {
                info!(%id, "persisted enriched record");
                Ok(enriched.with_id(id))
            }
            Err(error) => {
                warn!("failed to persist enriched record: {error}");
                metrics::counter!("enriched_records_persistence_failures_total").increment(1);
                Ok(enriched)
            }
        }
    }
}
