//! itemstore -- HTTP item table and blob storage server.
//!
//! Backends are chosen from configuration at startup.  Tables and
//! containers are created lazily on first use, so startup never blocks on
//! a remote store being reachable.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use itemstore::blobs::BlobStore;
use itemstore::config::{Config, LoggingConfig};
use itemstore::items::ItemStore;
use itemstore::storage::backend::BlobBackend;
use itemstore::table::store::TableBackend;

/// Fallback for the blob connection string when neither the config file
/// nor `ITEMSTORE_BLOB_CONNECTION_STRING` provides one.
const AZURE_CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

/// Command-line arguments for the itemstore server.
#[derive(Parser, Debug)]
#[command(
    name = "itemstore",
    version,
    about = "HTTP item table and blob storage server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "itemstore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the global tracing subscriber.  `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

async fn build_table_backend(config: &Config) -> anyhow::Result<Arc<dyn TableBackend>> {
    let table = &config.table;
    let backend: Arc<dyn TableBackend> = match table.backend.as_str() {
        "memory" => {
            info!("In-memory table backend initialized: table={}", table.name);
            Arc::new(itemstore::table::memory::MemoryTableBackend::new(
                &table.name,
            ))
        }
        "sqlite" => {
            let path = &table.sqlite.path;
            if path != ":memory:" {
                ensure_parent_dir(path)?;
            }
            let backend = itemstore::table::sqlite::SqliteTableBackend::new(path, &table.name)?;
            info!("SQLite table backend initialized at {} table={}", path, table.name);
            Arc::new(backend)
        }
        "dynamodb" => {
            let backend =
                itemstore::table::dynamodb::DynamoDbTableBackend::new(&table.dynamodb, &table.name)
                    .await?;
            info!(
                "DynamoDB table backend initialized: table={} region={:?} endpoint={:?}",
                table.name, table.dynamodb.region, table.dynamodb.endpoint_url
            );
            Arc::new(backend)
        }
        other => anyhow::bail!("Unknown table backend: {other}"),
    };
    Ok(backend)
}

fn build_blob_backend(config: &Config) -> anyhow::Result<Arc<dyn BlobBackend>> {
    let blob = &config.blob;
    let backend: Arc<dyn BlobBackend> = match blob.backend.as_str() {
        "memory" => {
            info!("In-memory blob backend initialized: container={}", blob.container);
            Arc::new(itemstore::storage::memory::MemoryBlobBackend::new(
                &blob.container,
            ))
        }
        "local" => {
            let root = &blob.local.root_dir;
            let backend =
                itemstore::storage::local::LocalBlobBackend::new(root, &blob.container)?;
            info!(
                "Local blob backend initialized at {} container={}",
                root, blob.container
            );
            Arc::new(backend)
        }
        "azure" => {
            let connection_string = if blob.azure.connection_string.trim().is_empty() {
                std::env::var(AZURE_CONNECTION_STRING_ENV).unwrap_or_default()
            } else {
                blob.azure.connection_string.clone()
            };
            Arc::new(itemstore::storage::azure::AzureBlobBackend::new(
                &connection_string,
                &blob.container,
            )?)
        }
        other => anyhow::bail!("Unknown blob backend: {other}"),
    };
    Ok(backend)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = itemstore::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        itemstore::metrics::init_metrics();
        itemstore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let items = ItemStore::new(
        build_table_backend(&config).await?,
        &config.table.partition_key,
        config.table.operation_timeout(),
    );
    let blobs = BlobStore::new(build_blob_backend(&config)?, config.blob.operation_timeout());

    let state = Arc::new(itemstore::AppState {
        config: config.clone(),
        items: Arc::new(items),
        blobs: Arc::new(blobs),
    });

    let app = itemstore::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("itemstore listening on {}", bind_addr);

    itemstore::server::serve(
        listener,
        app,
        shutdown_signal(),
        config.server.shutdown_grace(),
    )
    .await?;

    info!("itemstore shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
