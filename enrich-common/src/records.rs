//! # Records
//!
//! The user record carried on the queue and the enriched record produced from it.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Message attached to every record the pipeline finishes processing.
pub const PROCESSED_MESSAGE: &str = "User processed successfully";

/// A user record as submitted by a producer. This is also the queue payload.
/// New fields must be optional: messages already in the queue won't have them.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct UserRecord {
    pub name: String,
    pub document_number: String,
    #[serde(rename = "zipCode")]
    pub postal_code: String,
}

/// Response of the document validation collaborator.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub struct ValidationResult {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
}

/// Response of the address collaborator.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct AddressResult {
    pub street: String,
    pub city: String,
    pub state: String,
    #[serde(rename = "zipcode")]
    pub postal_code: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Processed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Processed => write!(f, "processed"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid RecordStatus")]
pub struct ParseRecordStatusError(pub String);

impl FromStr for RecordStatus {
    type Err = ParseRecordStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(RecordStatus::Processed),
            invalid => Err(ParseRecordStatusError(invalid.to_owned())),
        }
    }
}

/// A user record enriched with both lookups. Only built once both succeeded,
/// and never modified afterwards except for the id assigned by the store.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct EnrichedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub source: UserRecord,
    pub document_valid: bool,
    pub address: AddressResult,
    pub status: RecordStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl EnrichedRecord {
    pub fn processed(
        source: UserRecord,
        validation: ValidationResult,
        address: AddressResult,
    ) -> Self {
        Self {
            id: None,
            source,
            document_valid: validation.is_valid,
            address,
            status: RecordStatus::Processed,
            message: PROCESSED_MESSAGE.to_owned(),
            created_at: Utc::now(),
        }
    }

    /// Return this record with the id assigned to it by a store.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}

/// The stage at which a delivery failed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorType {
    Decode,
    Validation,
    AddressLookup,
}

/// Error appended to a queued message every time one of its deliveries is nacked.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DeliveryError {
    pub r#type: DeliveryErrorType,
    pub details: String,
}

impl DeliveryError {
    pub fn new(r#type: DeliveryErrorType, details: &str) -> Self {
        Self {
            r#type,
            details: details.to_owned(),
        }
    }
}
