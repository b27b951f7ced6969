use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Completes when the process receives SIGTERM or SIGINT.
pub async fn graceful_shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = interrupt.recv() => info!("received SIGINT"),
    }
}

/// A token cancelled on the first shutdown signal. Clone it into every long-running task.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        graceful_shutdown().await;
        cancel.cancel();
    });

    token
}
