//! Configuration loading and types for itemstore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct, then secrets and backend selection may be overridden
//! from the environment (see [`apply_env_overrides`]).  Credentials are
//! never compiled in.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `table.backend`.
pub const ENV_TABLE_BACKEND: &str = "ITEMSTORE_TABLE_BACKEND";
/// Environment variable overriding `table.name`.
pub const ENV_TABLE_NAME: &str = "ITEMSTORE_TABLE_NAME";
/// Environment variable overriding `blob.backend`.
pub const ENV_BLOB_BACKEND: &str = "ITEMSTORE_BLOB_BACKEND";
/// Environment variable overriding `blob.azure.connection_string`.
pub const ENV_BLOB_CONNECTION_STRING: &str = "ITEMSTORE_BLOB_CONNECTION_STRING";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Item table settings.
    #[serde(default)]
    pub table: TableConfig,

    /// Blob container settings.
    #[serde(default)]
    pub blob: BlobConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    /// How long in-flight requests may run after a shutdown signal.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Item table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Backend type: `memory`, `sqlite`, or `dynamodb`.
    #[serde(default = "default_table_backend")]
    pub backend: String,

    /// Name of the table holding items.
    #[serde(default = "default_table_name")]
    pub name: String,

    /// Fixed partition key every item is stored under.
    #[serde(default = "default_partition_key")]
    pub partition_key: String,

    /// Per-operation deadline in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// DynamoDB-specific configuration.
    #[serde(default)]
    pub dynamodb: DynamoDbConfig,
}

impl TableConfig {
    /// Default operation deadline as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            backend: default_table_backend(),
            name: default_table_name(),
            partition_key: default_partition_key(),
            operation_timeout_ms: default_operation_timeout_ms(),
            sqlite: SqliteConfig::default(),
            dynamodb: DynamoDbConfig::default(),
        }
    }
}

/// SQLite table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

/// DynamoDB table configuration.
///
/// Credentials come from the standard AWS provider chain (environment,
/// profile, instance role), never from this file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DynamoDbConfig {
    /// AWS region (falls back to the provider chain).
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint (e.g. DynamoDB Local, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

/// Blob container configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Backend type: `memory`, `local`, or `azure`.
    #[serde(default = "default_blob_backend")]
    pub backend: String,

    /// Container that holds every blob.
    #[serde(default = "default_container")]
    pub container: String,

    /// Per-operation deadline in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalBlobConfig,

    /// Azure Blob Storage configuration.
    #[serde(default)]
    pub azure: AzureBlobConfig,
}

impl BlobConfig {
    /// Default operation deadline as a [`Duration`].
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            container: default_container(),
            operation_timeout_ms: default_operation_timeout_ms(),
            local: LocalBlobConfig::default(),
            azure: AzureBlobConfig::default(),
        }
    }
}

/// Local filesystem blob configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalBlobConfig {
    /// Root directory; each container is a subdirectory.
    #[serde(default = "default_blob_root")]
    pub root_dir: String,
}

impl Default for LocalBlobConfig {
    fn default() -> Self {
        Self {
            root_dir: default_blob_root(),
        }
    }
}

/// Azure Blob Storage configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AzureBlobConfig {
    /// Storage account connection string.  Usually left empty here and
    /// supplied through `ITEMSTORE_BLOB_CONNECTION_STRING`.
    #[serde(default)]
    pub connection_string: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the `/health` probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7071
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_table_backend() -> String {
    "sqlite".to_string()
}

fn default_table_name() -> String {
    "items".to_string()
}

fn default_partition_key() -> String {
    "items".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_sqlite_path() -> String {
    "./data/items.db".to_string()
}

fn default_blob_backend() -> String {
    "local".to_string()
}

fn default_container() -> String {
    "blobs".to_string()
}

fn default_blob_root() -> String {
    "./data/blobs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}

/// Load and parse configuration from a YAML file at `path`, then apply
/// environment overrides from the process environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut config = parse_config(&contents)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Overlay environment-provided values on top of `config`.
///
/// `lookup` resolves a variable name to its value; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(backend) = get(ENV_TABLE_BACKEND) {
        config.table.backend = backend;
    }
    if let Some(name) = get(ENV_TABLE_NAME) {
        config.table.name = name;
    }
    if let Some(backend) = get(ENV_BLOB_BACKEND) {
        config.blob.backend = backend;
    }
    if let Some(conn) = get(ENV_BLOB_CONNECTION_STRING) {
        config.blob.azure.connection_string = conn;
    }
}
