//! # hush-db
//!
//! Storage layer for Hush.
//!
//! Two SQL modes, selected automatically from the `DATABASE_URL`:
//!
//! * **Full mode** (`postgres://…`) — PostgreSQL, multi-instance.
//! * **Lite mode** (`sqlite://…`) — embedded SQLite for development.
//!
//! Redis carries everything that must be shared across instances and
//! self-expire: rate-limit windows, penalty and blacklist entries, presence,
//! offline queues, idempotency nonces, and the pub/sub bus.

pub mod counter_store;
pub mod offline_queue;
pub mod repository;
pub mod sms;
pub mod storage;

use anyhow::Result;

/// Which backing store is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbBackend {
    Postgres,
    Sqlite,
}

impl DbBackend {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
            DbBackend::Sqlite
        } else {
            DbBackend::Postgres
        }
    }
}

/// Shared database state passed through Axum extractors and services.
#[derive(Clone)]
pub struct Database {
    /// SQL pool — works with both Postgres and SQLite.
    pub pool: sqlx::AnyPool,
    /// Redis connection manager (auto-reconnecting).
    pub redis: redis::aio::ConnectionManager,
    /// Redis client, for dedicated pub/sub connections (the bus cannot run
    /// over the multiplexed manager).
    pub redis_client: redis::Client,
    /// Which SQL backend is active.
    pub backend: DbBackend,
}

impl Database {
    /// Connect using the URLs in the config.
    pub async fn connect(cfg: &hush_common::config::AppConfig) -> Result<Self> {
        // Register all built-in drivers (Postgres + SQLite).
        sqlx::any::install_default_drivers();

        let backend = DbBackend::from_url(&cfg.database.url);

        let pool = match backend {
            DbBackend::Postgres => {
                tracing::info!("Connecting to PostgreSQL…");
                sqlx::any::AnyPoolOptions::new()
                    .max_connections(cfg.database.max_connections)
                    .min_connections(cfg.database.min_connections)
                    .connect(&cfg.database.url)
                    .await?
            }
            DbBackend::Sqlite => {
                tracing::info!("Connecting to SQLite: {}", &cfg.database.url);
                sqlx::any::AnyPoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .connect(&cfg.database.url)
                    .await?
            }
        };

        tracing::info!("Connecting to Redis…");
        let redis_client = redis::Client::open(cfg.redis.url.as_str())?;
        let redis = redis::aio::ConnectionManager::new(redis_client.clone()).await?;
        tracing::info!("Connected to Redis");

        Ok(Self {
            pool,
            redis,
            redis_client,
            backend,
        })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations…");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }
}
