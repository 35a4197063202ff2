use std::time::Duration;
use tokio::signal;
use topic_broker::config::Config;

/// Deadline the server waits for in-flight sessions to drain on shutdown
/// (spec.md §5/§6).
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    let port = config.port;
    let broker = topic_broker::build(config)
        .await
        .expect("failed to initialize storage backend");

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind to port {port}: {e}"));

    tracing::info!(port, "topic-broker listening");

    axum::serve(listener, broker.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    broker.storage.close().await;
    broker.cleanup_handle.abort();
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received, draining sessions");

    // axum's graceful shutdown has no built-in forced-close deadline: it
    // waits for every connection to close on its own. This watchdog is the
    // 5-second backstop (spec.md §5/§6).
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        tracing::warn!("grace period elapsed with sessions still open, forcing exit");
        std::process::exit(1);
    });
}
