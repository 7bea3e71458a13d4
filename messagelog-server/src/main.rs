//! Message Log Server - operator API for the secure message log
//!
//! Runs the message log engine (timestamping, archiving, cleaning) and exposes
//! it over HTTP. Configuration comes from environment variables, see [`Config`].

use std::sync::Arc;

use messagelog_core::messagelog::{LogComponents, LogManager, MemoryRecordStore, RecordStore};
use messagelog_core::tsp::{load_pem_certificates, HttpTsaClient, StaticTimestampingServices};
use messagelog_core::ZipArchiveWriter;
use messagelog_server::{create_router_with_config, AppState, Config, PostgresRecordStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("messagelog_server=info,messagelog_core=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        tsa_count = config.tsa_urls.len(),
        archive_path = %config.archive_path.display(),
        "Starting message log server"
    );

    let (store, store_backend) = open_store(&config).await?;

    let certificates = match &config.tsa_certs_path {
        Some(path) => load_pem_certificates(&std::fs::read(path)?)?,
        None => {
            warn!("TSA_CERTS not set: no TSA certificate is trusted, every token will be rejected");
            Vec::new()
        }
    };
    if config.tsa_urls.is_empty() {
        warn!("TSA_URLS not set: messages will be refused until a TSA is configured");
    }
    let services = StaticTimestampingServices::new(config.tsa_urls.clone(), certificates);

    let manager = LogManager::start(
        config.log.clone(),
        LogComponents {
            store,
            tsa_client: Arc::new(HttpTsaClient::new(config.tsa_http_config())?),
            services: Arc::new(services),
            archive_writer: Arc::new(ZipArchiveWriter::new(&config.archive_path)?),
        },
    )
    .await?;
    let manager = Arc::new(manager);

    let app = create_router_with_config(&config, AppState::new(manager.clone(), store_backend));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    info!("API docs on http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Open the PostgreSQL store, or the in-memory store when no database is configured.
async fn open_store(
    config: &Config,
) -> Result<(Arc<dyn RecordStore>, &'static str), BoxError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresRecordStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
            )
            .await?;
            Ok((Arc::new(store), "postgres"))
        }
        None => {
            warn!("DATABASE_URL not set: using the in-memory record store, records are lost on restart");
            Ok((Arc::new(MemoryRecordStore::new()), "memory"))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
