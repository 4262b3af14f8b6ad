//! # hushd
//!
//! The Hush server binary: wires the storage tier, the rate-limit engine,
//! the token authority, the HTTP surface, and the realtime gateway into
//! one process. Run several instances against the same Postgres + Redis
//! and the bus takes care of cross-instance delivery.
//!
//! Startup is fail-fast: a weak signing secret, unreachable database, or
//! malformed configuration exits nonzero before binding a socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;

use hush_api::AppState;
use hush_auth::approval::ApprovalService;
use hush_auth::registry::DeviceRegistry;
use hush_auth::{TokenAuthority, VerificationService};
use hush_db::Database;
use hush_db::counter_store::CounterStore;
use hush_db::offline_queue::OfflineQueue;
use hush_db::sms::SmsSender;
use hush_db::storage::BlobStore;
use hush_gateway::GatewayState;
use hush_gateway::bus::Bus;
use hush_gateway::hub::{CloseReason, Hub};
use hush_gateway::presence::PresenceTracker;
use hush_gateway::router::MessageRouter;
use hush_limits::{AbuseDetector, RateLimiter};

#[derive(Parser)]
#[command(name = "hushd", version, about = "Zero-knowledge messaging server")]
struct Cli {
    /// Run migrations and exit.
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = hush_common::config::AppConfig::load()
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hush=debug,tower_http=info".into()),
        )
        .with_target(true)
        .init();

    tracing::info!("Starting hushd v{}", env!("CARGO_PKG_VERSION"));

    // Connect + migrate. Unreachable stores are fatal at startup.
    let db = Database::connect(&config).await?;
    db.migrate().await?;
    if cli.migrate_only {
        tracing::info!("Migrations done, exiting (--migrate-only)");
        return Ok(());
    }

    let store = CounterStore::new(db.redis.clone());

    // Fail fast on a weak signing secret.
    let authority = Arc::new(TokenAuthority::new(
        &config.auth,
        db.pool.clone(),
        store.clone(),
    )?);

    let abuse = Arc::new(AbuseDetector::new(store.clone()));
    let limiter = RateLimiter::new(store.clone(), Arc::clone(&abuse));

    let sms = SmsSender::from_config(&config.sms, config.server.mode);
    let verification = VerificationService::new(db.pool.clone(), sms, config.server.mode);
    let registry = DeviceRegistry::new(db.clone());
    let approvals = ApprovalService::new(db.pool.clone());

    let blob = BlobStore::new(&config.storage)?;
    if !config.storage.endpoint.is_empty() {
        blob.ensure_bucket().await?;
        tracing::info!(bucket = %config.storage.bucket, "Blob store ready");
    } else {
        tracing::warn!("No blob store endpoint configured; media endpoints will fail");
    }

    // Realtime fabric.
    let server_id = config
        .server
        .server_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(server_id = %server_id, "Instance id on the bus");

    let hub = Arc::new(Hub::new());
    let queue = OfflineQueue::new(
        db.redis.clone(),
        config.limits.offline_queue_max_frames,
        config.limits.offline_queue_max_age_days,
    );
    let (bus, bus_rx) = Bus::start(db.redis_client.clone(), db.redis.clone(), server_id).await?;
    let presence = Arc::new(PresenceTracker::new(store.clone(), db.pool.clone()));
    let router = Arc::new(MessageRouter::new(
        db.clone(),
        Arc::clone(&hub),
        bus.clone(),
        queue.clone(),
        store.clone(),
    ));
    hush_gateway::spawn_bus_dispatcher(Arc::clone(&router), bus_rx);

    // HTTP surface.
    let api_state = Arc::new(AppState {
        db: db.clone(),
        store: store.clone(),
        authority: Arc::clone(&authority),
        verification: verification.clone(),
        registry,
        approvals,
        limiter,
        router: Arc::clone(&router),
        hub: Arc::clone(&hub),
        presence: Arc::clone(&presence),
        queue: queue.clone(),
        blob,
        mode: config.server.mode,
        limits: config.limits.clone(),
    });
    let api_router = hush_api::build_router(api_state);

    // WebSocket hub.
    let gateway_state = Arc::new(GatewayState::new(
        Arc::clone(&hub),
        Arc::clone(&authority),
        Arc::clone(&router),
        Arc::clone(&presence),
        bus,
        queue,
        store,
        db.clone(),
        config.limits.clone(),
    ));
    let gateway_router = hush_gateway::build_router(gateway_state);

    let api_addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let gateway_addr = SocketAddr::new(config.server.host.parse()?, config.server.gateway_port);

    tracing::info!("API listening on http://{api_addr}");
    tracing::info!("Gateway listening on ws://{gateway_addr}");

    // Graceful shutdown: stop accepting, close connections, drain for a
    // bounded interval, exit 0.
    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = Arc::clone(&shutdown);
        let hub = Arc::clone(&hub);
        let drain_secs = config.limits.shutdown_drain_secs;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("Shutdown signal received, draining for {drain_secs}s");
            shutdown.notify_waiters();
            hub.close_all(CloseReason::ServerShutdown).await;
            tokio::time::sleep(Duration::from_secs(drain_secs)).await;
            tracing::info!("Drain interval over, exiting");
            std::process::exit(0);
        });
    }

    let api_shutdown = Arc::clone(&shutdown);
    let gateway_shutdown = Arc::clone(&shutdown);

    tokio::try_join!(
        async {
            let listener = tokio::net::TcpListener::bind(api_addr).await?;
            axum::serve(
                listener,
                api_router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { api_shutdown.notified().await })
            .await?;
            Ok::<_, anyhow::Error>(())
        },
        async {
            let listener = tokio::net::TcpListener::bind(gateway_addr).await?;
            axum::serve(
                listener,
                gateway_router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { gateway_shutdown.notified().await })
            .await?;
            Ok::<_, anyhow::Error>(())
        },
    )?;

    Ok(())
}
