use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::notification::{HistoryPolicy, RecordDefaults};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Backend REST base URL (e.g. `http://localhost:3000/api`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value sent in the `token` header
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Backend host serving the socket endpoint
    #[serde(default = "default_socket_url")]
    pub url: String,
    /// Engine.IO endpoint path
    #[serde(default = "default_socket_path")]
    pub path: String,
    /// Namespace dedicated to notifications
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Event carrying live notifications
    #[serde(default = "default_event")]
    pub event: String,
    /// User identity sent after every (re)connect
    #[serde(default)]
    pub identify_user_id: Option<i64>,
    /// Handshake timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub reconnect_enabled: bool,
    /// Maximum consecutive failed attempts (0 = unlimited)
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Number of persisted notifications fetched per load
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    /// How a completed history load combines with live records
    #[serde(default)]
    pub history_policy: HistoryPolicy,
    /// Reload history after the transport reconnects
    #[serde(default = "default_true")]
    pub backfill_on_reconnect: bool,
    /// Buffered live events per relay subscriber
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,
    /// chrono format string for display times
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default = "default_fallback_title")]
    pub fallback_title: String,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    #[serde(default = "default_fallback_icon")]
    pub fallback_icon: String,
    #[serde(default = "default_fallback_color")]
    pub fallback_color: String,
    /// Ask the backend to push a test event on startup (development aid)
    #[serde(default)]
    pub emit_test_on_start: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_socket_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_socket_path() -> String {
    "/socket.io/".to_string()
}

fn default_namespace() -> String {
    "/notifications".to_string()
}

fn default_event() -> String {
    "shipment-update".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_reconnect_initial_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_history_limit() -> u32 {
    50
}

fn default_relay_capacity() -> usize {
    256
}

fn default_time_format() -> String {
    "%d/%m/%Y %H:%M".to_string()
}

fn default_fallback_title() -> String {
    "Actualización de envío".to_string()
}

fn default_fallback_message() -> String {
    "Se ha actualizado un envío".to_string()
}

fn default_fallback_icon() -> String {
    "assets/images/notification/shipping.png".to_string()
}

fn default_fallback_color() -> String {
    "success".to_string()
}

fn default_log_filter() -> String {
    "info,ara_notification_client=debug".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ara-notification-client".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("api.base_url", default_base_url())?
            .set_default("socket.url", default_socket_url())?
            .set_default("socket.namespace", default_namespace())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARA__API__BASE_URL, ARA__SOCKET__IDENTIFY_USER_ID, ARA__FEED__HISTORY_POLICY, ...
            .add_source(
                Environment::with_prefix("ARA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl FeedConfig {
    /// Fallback values applied when records omit fields
    pub fn record_defaults(&self) -> RecordDefaults {
        RecordDefaults {
            title: self.fallback_title.clone(),
            message: self.fallback_message.clone(),
            icon: self.fallback_icon.clone(),
            color: self.fallback_color.clone(),
            time_format: self.time_format.clone(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            path: default_socket_path(),
            namespace: default_namespace(),
            event: default_event(),
            identify_user_id: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_enabled: true,
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            history_policy: HistoryPolicy::default(),
            backfill_on_reconnect: true,
            relay_capacity: default_relay_capacity(),
            time_format: default_time_format(),
            fallback_title: default_fallback_title(),
            fallback_message: default_fallback_message(),
            fallback_icon: default_fallback_icon(),
            fallback_color: default_fallback_color(),
            emit_test_on_start: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
