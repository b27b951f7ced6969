//! HTTP clients for the document validation and address collaborators.
use std::time;

use async_trait::async_trait;
use enrich_common::records::{AddressResult, ValidationResult};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// Enumeration of errors returned by a collaborator call. None of them are retried here.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("request to {url} failed: {error}")]
    RequestError { url: Url, error: reqwest::Error },
    #[error("{url} responded with {status}")]
    StatusError {
        url: Url,
        status: StatusCode,
        retry_after: Option<time::Duration>,
    },
    #[error("failed to parse response from {url}: {error}")]
    ParseError { url: Url, error: reqwest::Error },
    #[error("{0} cannot be used as a base url")]
    InvalidBaseUrl(Url),
}

impl LookupError {
    /// The Retry-After hint of the collaborator, if it sent one.
    pub fn retry_after(&self) -> Option<time::Duration> {
        match self {
            LookupError::StatusError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LookupError::RequestError { error, .. } if error.is_timeout())
    }
}

#[async_trait]
pub trait DocumentValidator: Send + Sync {
    async fn validate(&self, document_number: &str) -> Result<ValidationResult, LookupError>;
}

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, postal_code: &str) -> Result<AddressResult, LookupError>;
}

/// Build the HTTP client shared by both collaborators. Every request is bounded by `timeout`.
pub fn build_http_client(timeout: time::Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("enrich-worker")
        .timeout(timeout)
        .build()
}

/// Calls `GET <base>/<document_number>`.
pub struct HttpDocumentValidator {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDocumentValidator {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl DocumentValidator for HttpDocumentValidator {
    async fn validate(&self, document_number: &str) -> Result<ValidationResult, LookupError> {
        let url = lookup_url(&self.base_url, document_number)?;
        get_json(&self.client, url).await
    }
}

/// Calls `GET <base>/<postal_code>`.
pub struct HttpAddressResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAddressResolver {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl AddressResolver for HttpAddressResolver {
    async fn resolve(&self, postal_code: &str) -> Result<AddressResult, LookupError> {
        let url = lookup_url(&self.base_url, postal_code)?;
        get_json(&self.client, url).await
    }
}

/// Append `segment` to the path of `base`, percent-encoded as a single segment.
pub fn lookup_url(base: &Url, segment: &str) -> Result<Url, LookupError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| LookupError::InvalidBaseUrl(base.clone()))?
        .pop_if_empty()
        .push(segment);

    Ok(url)
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
) -> Result<T, LookupError> {
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(error) => return Err(LookupError::RequestError { url, error }),
    };

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after_header(response.headers());
        return Err(LookupError::StatusError {
            url,
            status,
            retry_after,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|error| LookupError::ParseError { url, error })
}

/// Attempt to parse a Duration from a Retry-After header, returning None if not possible.
/// Retry-After header can specify a date in RFC2822 or a number of seconds; we try to parse both.
fn parse_retry_after_header(header_map: &reqwest::header::HeaderMap) -> Option<time::Duration> {
    let retry_after = header_map
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;

    if let Ok(u) = retry_after.parse::<u64>() {
        return Some(time::Duration::from_secs(u));
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(retry_after) {
        let duration =
            chrono::DateTime::<chrono::offset::Utc>::from(dt) - chrono::offset::Utc::now();

        // This can only fail when negative, in which case we return None.
        return duration.to_std().ok();
    }

    None
}
