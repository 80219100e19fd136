//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::state::AppState;
use event_store::{EventBus, EventStore, PostgresCheckpointStore, PostgresEventStore};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::PostgresProjectionStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the server and the background pipeline until a shutdown signal.
async fn serve<S>(state: Arc<AppState<S>>, config: &Config, metrics_handle: PrometheusHandle)
where
    S: EventStore + EventBus + Clone + 'static,
{
    // Replay anything already in the log before accepting requests
    state.sync().await.expect("initial catch-up failed");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = state.spawn_background(shutdown_rx);

    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, service = %config.service_name, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for task in background {
        if let Err(error) = task.await {
            tracing::warn!(%error, "background task ended abnormally");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Create stores and run
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            let event_store = PostgresEventStore::new(pool.clone());
            event_store
                .run_migrations()
                .await
                .expect("failed to run migrations");

            let state = Arc::new(AppState::new(
                event_store,
                Arc::new(PostgresCheckpointStore::new(pool.clone())),
                Arc::new(PostgresProjectionStore::new(pool)),
                &config,
            ));
            serve(state, &config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            let state = api::create_in_memory_state(&config);
            serve(state, &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
