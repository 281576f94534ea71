mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, header::CONTENT_TYPE};
use fileswap_api::{AppState, BlobSink, HostedBlobSink, LocalBlobSink, SwapEngine};
use fileswap_db::{JsonFileStore, MemoryStore, PostgrestStore, SqliteStore, SwapStore};
use fileswap_types::{Clock, SystemClock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{BlobConfig, Config, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "fileswap_server=debug,fileswap_api=debug,fileswap_db=debug,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = open_store(&config.store, clock.clone())?;
    let blobs = open_blobs(&config.blob).await?;
    info!(
        "Swap store: {}, blob sink: {}",
        store.backend(),
        blobs.backend()
    );

    let engine = Arc::new(SwapEngine::new(store, clock));

    // Background expiry sweep, stopped at shutdown
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(cleanup::run_sweep_loop(
        engine.clone(),
        blobs.clone(),
        config.sweep_interval,
        shutdown.clone(),
    ));

    let state = AppState { engine, blobs };

    // Permissive CORS: browsers upload from any origin
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(false);

    let app = fileswap_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("File swap server listening on {}", addr);
    info!(
        "Sweep interval: {}s",
        config.sweep_interval.as_secs()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    sweeper.await?;
    info!("Shutdown complete");

    Ok(())
}

fn open_store(config: &StoreConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn SwapStore>> {
    let store: Arc<dyn SwapStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new(clock)),
        StoreConfig::Json(path) => {
            info!("Swap snapshot: {}", path.display());
            Arc::new(JsonFileStore::new(path.clone(), clock))
        }
        StoreConfig::Sqlite(path) => Arc::new(SqliteStore::open(path, clock)?),
        StoreConfig::Postgrest { url, key, table } => {
            info!("Swap table: {} at {}", table, url);
            Arc::new(PostgrestStore::new(url, key, table, clock)?)
        }
    };
    Ok(store)
}

async fn open_blobs(config: &BlobConfig) -> anyhow::Result<Arc<dyn BlobSink>> {
    let blobs: Arc<dyn BlobSink> = match config {
        BlobConfig::Local(dir) => Arc::new(LocalBlobSink::new(dir.clone()).await?),
        BlobConfig::Hosted {
            url,
            token,
            public_host,
        } => {
            info!("Blob endpoint: {}", url);
            let mut sink = HostedBlobSink::new(url, token.clone())?;
            if let Some(host) = public_host {
                info!("Blob public host: {}", host);
                sink = sink.with_public_host(host);
            }
            Arc::new(sink)
        }
    };
    Ok(blobs)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
