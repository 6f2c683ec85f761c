/// Configuration management
///
/// Raw values come from the process environment (after `.env` is loaded)
/// through `envy`, then get validated into `Config`. Any validation failure
/// is fatal at startup.
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{FailurePolicy, WorkerSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("{name} is not a valid table name: {value:?}")]
    InvalidIdentifier { name: &'static str, value: String },

    #[error("Unknown FAILURE_POLICY: {0}")]
    UnknownPolicy(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("FAILURE_POLICY=dead_letter requires DEAD_LETTER_QUEUE")]
    MissingDeadLetterQueue,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_app_env")]
    app_env: String,
    #[serde(default = "default_app_port")]
    app_port: u16,
    table_name: Option<String>,
    connections_table_name: Option<String>,
    database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    redis_url: Option<String>,
    #[serde(default = "default_operation_queue")]
    operation_queue: String,
    notification_queue: Option<String>,
    dead_letter_queue: Option<String>,
    #[serde(default = "default_batch_size")]
    create_batch_size: usize,
    #[serde(default = "default_batch_size")]
    notify_batch_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    queue_poll_interval_ms: u64,
    #[serde(default)]
    failure_policy: Option<String>,
    #[serde(default = "default_max_receive_count")]
    max_receive_count: u32,
    #[serde(default = "default_heartbeat_secs")]
    ws_heartbeat_secs: u64,
    #[serde(default = "default_client_timeout_secs")]
    ws_client_timeout_secs: u64,
    instance_id: Option<String>,
    #[serde(default = "default_relay_channel_prefix")]
    relay_channel_prefix: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_log_format")]
    log_format: String,
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_app_port() -> u16 {
    8000
}

fn default_max_connections() -> u32 {
    10
}

fn default_operation_queue() -> String {
    "item-operations".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_client_timeout_secs() -> u64 {
    30
}

fn default_relay_channel_prefix() -> String {
    "item-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub queues: QueueConfig,
    pub websocket: WebSocketConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory store and registry.
    pub url: Option<String>,
    pub max_connections: u32,
    pub table_name: String,
    pub connections_table_name: String,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// `None` selects in-process queues.
    pub redis_url: Option<String>,
    pub operation_queue: String,
    pub notification_queue: Option<String>,
    pub dead_letter_queue: Option<String>,
    pub create_batch_size: usize,
    pub notify_batch_size: usize,
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
    pub max_receive_count: u32,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// Owner recorded on every connection this process registers.
    pub instance_id: String,
    pub relay_channel_prefix: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let raw: RawConfig = envy::from_env()?;
        Self::from_raw(raw)
    }

    /// Build from explicit `(NAME, value)` pairs instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let raw: RawConfig =
            envy::from_iter(vars.into_iter().map(|(k, v)| (k.into(), v.into())))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let table_name = required_identifier("TABLE_NAME", raw.table_name)?;
        let connections_table_name =
            required_identifier("CONNECTIONS_TABLE_NAME", raw.connections_table_name)?;

        let failure_policy = match non_empty(raw.failure_policy) {
            Some(value) => value
                .parse::<FailurePolicy>()
                .map_err(|_| ConfigError::UnknownPolicy(value))?,
            None => FailurePolicy::default(),
        };

        if raw.create_batch_size == 0 {
            return Err(ConfigError::Zero("CREATE_BATCH_SIZE"));
        }
        if raw.notify_batch_size == 0 {
            return Err(ConfigError::Zero("NOTIFY_BATCH_SIZE"));
        }
        if raw.max_receive_count == 0 {
            return Err(ConfigError::Zero("MAX_RECEIVE_COUNT"));
        }
        if raw.ws_heartbeat_secs == 0 {
            return Err(ConfigError::Zero("WS_HEARTBEAT_SECS"));
        }

        let dead_letter_queue = non_empty(raw.dead_letter_queue);
        if failure_policy == FailurePolicy::DeadLetter && dead_letter_queue.is_none() {
            return Err(ConfigError::MissingDeadLetterQueue);
        }

        Ok(Config {
            app: AppConfig {
                env: raw.app_env,
                port: raw.app_port,
            },
            database: DatabaseConfig {
                url: non_empty(raw.database_url),
                max_connections: raw.database_max_connections,
                table_name,
                connections_table_name,
            },
            queues: QueueConfig {
                redis_url: non_empty(raw.redis_url),
                operation_queue: raw.operation_queue,
                notification_queue: non_empty(raw.notification_queue),
                dead_letter_queue,
                create_batch_size: raw.create_batch_size,
                notify_batch_size: raw.notify_batch_size,
                poll_interval: Duration::from_millis(raw.queue_poll_interval_ms),
                failure_policy,
                max_receive_count: raw.max_receive_count,
            },
            websocket: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(raw.ws_heartbeat_secs),
                client_timeout: Duration::from_secs(raw.ws_client_timeout_secs),
                instance_id: non_empty(raw.instance_id)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                relay_channel_prefix: raw.relay_channel_prefix,
            },
            logging: LoggingConfig {
                level: raw.log_level,
                format: raw.log_format,
            },
        })
    }
}

impl QueueConfig {
    pub fn worker_settings(&self, batch_size: usize) -> WorkerSettings {
        WorkerSettings {
            batch_size,
            poll_interval: self.poll_interval,
            policy: self.failure_policy,
            max_receive_count: self.max_receive_count,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required_identifier(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let value = non_empty(value).ok_or(ConfigError::Missing(name))?;
    if is_sql_identifier(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidIdentifier { name, value })
    }
}

/// Table names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    value.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
