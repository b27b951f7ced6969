use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use enrich_common::records::{EnrichedRecord, UserRecord};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use super::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct PublishResponse {
    pub message: String,
    pub data: UserRecord,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecordsResponse {
    pub data: Vec<EnrichedRecord>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RecordResponse {
    pub data: EnrichedRecord,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

pub async fn publish(
    State(state): State<AppState>,
    payload: Result<Json<UserRecord>, JsonRejection>,
) -> Result<Json<PublishResponse>, ErrorReply> {
    let Json(record) = payload.map_err(|rejection| {
        debug!("rejected publish request: {}", rejection);
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => reply(StatusCode::PAYLOAD_TOO_LARGE, &rejection.body_text()),
            _ => reply(StatusCode::BAD_REQUEST, "Invalid JSON format"),
        }
    })?;

    let start_time = Instant::now();

    state.publisher.publish(&record).await.map_err(|err| {
        error!("failed to publish message: {}", err);
        reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to publish message: {err}"),
        )
    })?;

    metrics::histogram!("api_publish_duration_seconds").record(start_time.elapsed().as_secs_f64());

    Ok(Json(PublishResponse {
        message: "Message published successfully".to_owned(),
        data: record,
    }))
}

pub async fn processed(
    State(state): State<AppState>,
) -> Result<Json<RecordsResponse>, ErrorReply> {
    let records = state.store.find_all().await.map_err(fetch_error)?;

    Ok(Json(RecordsResponse {
        count: records.len(),
        data: records,
    }))
}

pub async fn processed_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordResponse>, ErrorReply> {
    let id = Uuid::parse_str(&id).map_err(|_| reply(StatusCode::BAD_REQUEST, "Invalid id"))?;

    match state.store.find_by_id(id).await.map_err(fetch_error)? {
        Some(record) => Ok(Json(RecordResponse { data: record })),
        None => Err(reply(StatusCode::NOT_FOUND, "User not found")),
    }
}

fn fetch_error<E>(err: E) -> ErrorReply
where
    E: std::error::Error,
{
    error!("failed to fetch processed users: {}", err);
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Failed to fetch data: {err}"),
    )
}

fn reply(status: StatusCode, msg: &str) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_owned(),
        }),
    )
}
