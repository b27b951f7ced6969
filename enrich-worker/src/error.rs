use enrich_common::pgqueue;
use thiserror::Error;

/// Enumeration of errors related to initialization of the consumer and settlement of deliveries.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("a database error occurred when settling a delivery: {0}")]
    DatabaseError(#[from] pgqueue::DatabaseError),
    #[error("failed to build the collaborators http client: {0}")]
    HttpClientError(#[from] reqwest::Error),
    #[error("invalid collaborator url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("the prefetch semaphore was closed")]
    SemaphoreClosed,
}
