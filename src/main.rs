use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use atrium::config::Config;
use atrium::identity::local::LocalIdentity;
use atrium::rbac::cache::PermissionCache;
use atrium::store::AppState;
use atrium::{api, jobs, queue, store};

/// Inbound requests inherit this deadline; store calls finish within it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load();

    // Tracing: JSON in production, human-readable otherwise
    let filter = EnvFilter::try_from_env("ATRIUM_LOG").unwrap_or_else(|_| "info".into());
    if cfg.app_env.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    let pool = store::pool::connect(&cfg.database_url).await?;
    store::bootstrap::run(&pool).await?;

    if cfg.identity_connection_uri != "embedded" {
        anyhow::bail!(
            "unsupported identity engine {:?}; only the embedded engine is available",
            cfg.identity_connection_uri
        );
    }
    let identity = Arc::new(LocalIdentity::new(pool.clone(), &cfg));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let state = AppState {
        pool,
        identity,
        config: Arc::new(cfg.clone()),
        rbac_cache: Arc::new(PermissionCache::new()),
        http,
    };

    // Background workers share a shutdown signal with the server.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let worker_handle = tokio::spawn(queue::worker::run(
        state.clone(),
        jobs::registry(),
        shutdown_rx.clone(),
    ));
    let scheduler_handle = tokio::spawn(queue::scheduler::run(
        state.clone(),
        jobs::schedules()?,
        shutdown_rx,
    ));

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state);

    let addr: SocketAddr = cfg.listen_addr.parse()?;
    tracing::info!(%addr, "starting atrium");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    let _ = worker_handle.await;
    let _ = scheduler_handle.await;

    tracing::info!("atrium stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
