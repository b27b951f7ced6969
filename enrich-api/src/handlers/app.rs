use std::convert::Infallible;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing, Router};
use enrich_common::publisher::Publisher;
use enrich_common::store::RecordStore;
use health::HealthRegistry;
use tower::limit::ConcurrencyLimitLayer;

use super::{status, users};

/// Shared by every handler. The store may be degraded, the publisher never is.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn Publisher>,
    pub store: Arc<dyn RecordStore>,
}

pub fn add_routes(
    router: Router,
    state: AppState,
    liveness: Option<HealthRegistry>,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    let router = router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index));

    // Without an embedded consumer there is no async loop to check, just axum health.
    let router = match liveness {
        Some(liveness) => router.route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        ),
        None => router.route("/_liveness", routing::get(index)),
    };

    let api = Router::new()
        .route("/health", routing::get(status::health))
        .route(
            "/api/v1/users/publish",
            routing::post(users::publish)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/api/v1/users/processed", routing::get(users::processed))
        .route(
            "/api/v1/users/processed/:id",
            routing::get(users::processed_by_id),
        )
        .with_state(state);

    router.merge(api)
}

pub async fn index() -> &'static str {
    "enrich api"
}
