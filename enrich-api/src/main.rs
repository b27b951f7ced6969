use std::sync::Arc;
use std::time;

use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use enrich_common::metrics::setup_metrics_routes;
use enrich_common::pgqueue::PgQueue;
use enrich_common::publisher::QueuePublisher;
use enrich_common::shutdown::shutdown_token;
use enrich_common::store::connect_or_degrade;
use enrich_worker::consumer::Consumer;
use handlers::AppState;
use health::HealthRegistry;

mod config;
mod handlers;

async fn listen(app: Router, bind: String, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn connect_queue(config: &Config) -> PgQueue {
    PgQueue::new(
        config.broker.queue_name.as_str(),
        &config.broker.database_url,
        config.broker.max_pg_connections,
        "enrich-api",
    )
    .await
    .expect("failed to connect to the broker")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let shutdown = shutdown_token();

    let publish_queue = connect_queue(&config).await;
    let store = connect_or_degrade(&config.persistence, "enrich-api").await;

    // The consumer gets its own pool, so publishing never waits behind a held delivery.
    let (liveness, consumer) = if config.consumer_enabled {
        let liveness = HealthRegistry::new("liveness");
        let consumer_liveness = liveness
            .register("consumer".to_string(), time::Duration::from_secs(60))
            .await;
        let consumer = Consumer::from_config(
            &config.consumer,
            connect_queue(&config).await,
            store.clone(),
            consumer_liveness,
        )
        .expect("failed to initialize consumer");

        (
            Some(liveness),
            Some(tokio::spawn(consumer.run(shutdown.clone()))),
        )
    } else {
        (None, None)
    };

    let state = AppState {
        publisher: Arc::new(QueuePublisher::new(
            publish_queue.clone(),
            config.publish_timeout.0,
            config.max_delivery_attempts,
        )),
        store,
    };
    let app = handlers::add_routes(
        Router::new(),
        state,
        liveness,
        config.max_body_size,
        config.concurrency_limit,
    );
    let app = setup_metrics_routes(app);

    info!("listening on {}", config.bind());
    if let Err(e) = listen(app, config.bind(), shutdown.clone()).await {
        error!("failed to start enrich-api http server, {}", e);
        shutdown.cancel();
    }

    if let Some(consumer) = consumer {
        match consumer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("consumer failed: {}", e),
            Err(e) => error!("consumer task panicked: {}", e),
        }
    }
    publish_queue.close().await;
    info!("enrich-api stopped");
}
