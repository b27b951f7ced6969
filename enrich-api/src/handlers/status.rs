use axum::{extract::State, Json};
use serde_derive::{Deserialize, Serialize};

use super::AppState;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub broker_connected: bool,
    pub message: String,
}

/// Always 200 while the process serves requests. Broker connectivity is checked live.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        broker_connected: state.publisher.is_connected().await,
        message: "API is running".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    use crate::handlers::add_routes;
    use crate::handlers::test_utils::{app_state, FakePublisher, MemoryStore};

    async fn get_health(publisher: FakePublisher) -> (StatusCode, Value) {
        let app = add_routes(
            Router::new(),
            app_state(publisher, MemoryStore::default()),
            None,
            1_000_000,
            10,
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_connected_broker() {
        let (status, body) = get_health(FakePublisher::default()).await;

        assert_eq!(status, StatusCode::OK);
        assert_json_eq!(
            body,
            json!({
                "status": "ok",
                "broker_connected": true,
                "message": "API is running"
            })
        );
    }

    #[tokio::test]
    async fn health_reports_disconnected_broker() {
        let (status, body) = get_health(FakePublisher::disconnected()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["broker_connected"], false);
        assert_eq!(body["status"], "ok");
    }
}
