//! Consume queued user records and enrich them.
use std::time;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use tracing::error;

use enrich_common::{
    metrics::setup_metrics_routes, pgqueue::PgQueue, shutdown::shutdown_token,
    store::connect_or_degrade,
};
use enrich_worker::config::Config;
use enrich_worker::consumer::Consumer;
use enrich_worker::error::ConsumerError;
use health::HealthRegistry;

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");
    let shutdown = shutdown_token();

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness
        .register("consumer".to_string(), time::Duration::from_secs(60))
        .await;

    let queue = PgQueue::new(
        config.broker.queue_name.as_str(),
        &config.broker.database_url,
        config.broker.max_pg_connections,
        "enrich-worker",
    )
    .await
    .expect("failed to connect to the broker");
    let store = connect_or_degrade(&config.persistence, "enrich-worker").await;

    let consumer = Consumer::from_config(&config.consumer, queue, store, consumer_liveness)?;

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    let server_shutdown = shutdown.clone();
    tokio::task::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("failed to bind {}: {}", bind, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            error!("failed to serve metrics: {}", e);
        }
    });

    consumer.run(shutdown).await
}

pub async fn index() -> &'static str {
    "enrich worker"
}
