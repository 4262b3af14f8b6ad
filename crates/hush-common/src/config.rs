//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for
//! production. Config precedence: env vars > .env file > config.toml > defaults.
//!
//! Unlike most settings, the JWT signing secret has no default: a missing or
//! weak secret is a startup error, enforced by the token authority.

use serde::Deserialize;

/// Operating mode. Development may echo verification codes in HTTP responses
/// and soft-fails SMS delivery; production never does either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Production,
    Development,
}

impl RunMode {
    pub fn is_production(self) -> bool {
        matches!(self, RunMode::Production)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub sms: SmsConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Load configuration from defaults, an optional `config.toml`, and
    /// `HUSH_*` environment variables (e.g. `HUSH_DATABASE__URL`).
    ///
    /// The result is owned by the caller and injected into services by
    /// constructor; there is no global config.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let cfg = config::Config::builder()
            // Defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.gateway_port", 8081)?
            .set_default("server.mode", "development")?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 5)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("auth.access_token_ttl_secs", 3_600)? // 1 hour
            .set_default("auth.refresh_token_ttl_secs", 2_592_000)? // 30 days
            .set_default("auth.previous_secret_window_secs", 3_600)?
            .set_default("sms.gateway_url", "")?
            .set_default("sms.api_key", "")?
            .set_default("sms.sender", "Hush")?
            .set_default("storage.endpoint", "")?
            .set_default("storage.bucket", "hush-media")?
            .set_default("storage.access_key", "")?
            .set_default("storage.secret_key", "")?
            .set_default("storage.region", "us-east-1")?
            .set_default("limits.outbound_buffer_frames", 256)?
            .set_default("limits.heartbeat_interval_secs", 30)?
            .set_default("limits.idle_after_secs", 120)?
            .set_default("limits.frames_per_minute", 600)?
            .set_default("limits.upgrades_per_ip", 10)?
            .set_default("limits.offline_queue_max_frames", 10_000)?
            .set_default("limits.offline_queue_max_age_days", 30)?
            .set_default("limits.drain_ack_timeout_secs", 60)?
            .set_default("limits.shutdown_drain_secs", 10)?
            .set_default("limits.max_media_bytes", 52_428_800)? // 50 MB
            .set_default("limits.max_one_time_prekeys", 100)?
            // Optional config file
            .add_source(config::File::with_name("config").required(false))
            // Environment variables (HUSH_SERVER__HOST, HUSH_DATABASE__URL, etc.)
            .add_source(
                config::Environment::with_prefix("HUSH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP API port
    pub port: u16,
    /// WebSocket hub port
    pub gateway_port: u16,
    /// Unique id of this instance on the cross-instance bus.
    /// Defaults to a random id per process when unset.
    #[serde(default)]
    pub server_id: Option<String>,
    pub mode: RunMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL (production) or SQLite (lite/dev) connection URL
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL — counter store, presence, offline queues, bus.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Current JWT signing secret (HS256). Must be at least 32 bytes with
    /// Shannon entropy >= 3.5 bits/char; checked at startup.
    pub jwt_secret: String,
    /// Previous signing secret, accepted for validation during rotation.
    #[serde(default)]
    pub previous_jwt_secret: Option<String>,
    /// How long tokens signed with the previous secret stay valid.
    pub previous_secret_window_secs: u64,
    /// Access token TTL in seconds
    pub access_token_ttl_secs: u64,
    /// Refresh token TTL in seconds
    pub refresh_token_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmsConfig {
    /// HTTP SMS gateway endpoint. Empty in development — codes are logged
    /// (and echoed in responses) instead of dispatched.
    pub gateway_url: String,
    pub api_key: String,
    /// Sender id shown to the recipient.
    pub sender: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// S3 endpoint URL (e.g. http://localhost:9000 for MinIO).
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Bounded per-connection outbound queue; overflow closes the connection.
    pub outbound_buffer_frames: usize,
    pub heartbeat_interval_secs: u64,
    /// Seconds without an inbound frame before a connection is marked idle.
    pub idle_after_secs: u64,
    /// Per-connection inbound frame cap (the hub's own rate limit; the HTTP
    /// limiter does not apply to the persistent channel).
    pub frames_per_minute: u32,
    /// Concurrent upgrade attempts allowed per source ip.
    pub upgrades_per_ip: u32,
    pub offline_queue_max_frames: usize,
    pub offline_queue_max_age_days: i64,
    /// How long a drained frame may stay un-acked before it is re-emitted
    /// on the next connection.
    pub drain_ack_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
    pub max_media_bytes: u64,
    pub max_one_time_prekeys: usize,
}
