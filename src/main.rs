//! tilelog server: accepts entries over HTTP and publishes a tiled,
//! checkpointed Merkle log

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilelog::api::{create_router, AppState};
use tilelog::{LogParams, LogStore, NoteSigner, Pool, PoolConfig, Sequencer};

/// Development-only signing seed, used when no key file is given
const DEV_SEED: [u8; 32] = *b"tilelog-dev-seed-do-not-deploy!!";

#[derive(Parser, Debug)]
#[command(name = "tilelog")]
#[command(about = "Write path of a tiled transparency log")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "TILELOG_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(long, env = "TILELOG_PORT", default_value = "2024")]
    port: u16,

    /// Path to the SQLite database
    #[arg(long, env = "TILELOG_DATABASE_PATH", default_value = "./tilelog.db")]
    database: String,

    /// Origin name embedded in checkpoint notes
    #[arg(long, env = "TILELOG_ORIGIN", default_value = "tilelog-dev")]
    origin: String,

    /// Path to a 32-byte Ed25519 signing seed
    #[arg(long, env = "TILELOG_SIGNING_KEY_PATH")]
    signing_key: Option<String>,

    /// Entries per bundle and hashes per tile (power of two, 2..=256)
    #[arg(long, env = "TILELOG_ENTRY_BUNDLE_SIZE", default_value = "256")]
    entry_bundle_size: usize,

    /// Batch size trigger for the pool
    #[arg(long, env = "TILELOG_BATCH_SIZE", default_value = "1")]
    batch_size: usize,

    /// Max age of a batch before it is flushed (milliseconds)
    #[arg(long, env = "TILELOG_BATCH_MAX_AGE_MS", default_value = "100")]
    batch_max_age_ms: u64,

    /// Submission channel capacity
    #[arg(long, env = "TILELOG_BUFFER_SIZE", default_value = "1024")]
    buffer_size: usize,

    /// Accept zero-length entries
    #[arg(long, env = "TILELOG_ALLOW_EMPTY_ENTRIES")]
    allow_empty_entries: bool,

    /// Log level
    #[arg(long, env = "TILELOG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting tilelog v{}", env!("CARGO_PKG_VERSION"));

    let params = LogParams {
        entry_bundle_size: args.entry_bundle_size,
    };
    params.validate()?;
    let pool_config = PoolConfig {
        batch_size: args.batch_size,
        batch_max_age: Duration::from_millis(args.batch_max_age_ms),
        buffer_size: args.buffer_size,
        allow_empty_entries: args.allow_empty_entries,
        ..Default::default()
    };
    pool_config.validate()?;

    let signer = match &args.signing_key {
        Some(path) => NoteSigner::from_file(args.origin.as_str(), path)?,
        None => {
            tracing::warn!("no signing key configured, using the development seed");
            NoteSigner::new(args.origin.as_str(), &DEV_SEED)
        }
    };
    let signer = Arc::new(signer);

    tracing::info!(database = %args.database, "opening store");
    let store = Arc::new(LogStore::open(&args.database)?);

    let sequencer = Arc::new(Sequencer::new(store.clone(), signer.clone(), params));
    if sequencer.ensure_initialized()? {
        tracing::info!(origin = %args.origin, "created initial checkpoint");
    }

    let (pool, handle) = Pool::new(sequencer, pool_config);
    let pool_task = tokio::spawn(pool.run());

    let latency = Arc::new(tilelog::api::Latency::default());
    let state = Arc::new(AppState {
        pool: handle,
        store: store.clone(),
        latency: latency.clone(),
    });
    // the stats task deliberately holds the store and latency only, so the
    // pool handle drops with the router on shutdown and the pool can drain
    spawn_stats_logger(store, latency, signer);

    let app = create_router(state);
    let bind_addr = format!("{}:{}", args.host, args.port);
    tracing::info!(%bind_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("waiting for the pool to drain");
    pool_task.await?;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Periodically log checkpoint growth and add latency
fn spawn_stats_logger(
    store: Arc<LogStore>,
    latency: Arc<tilelog::api::Latency>,
    signer: Arc<NoteSigner>,
) {
    use tilelog::CheckpointCodec;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        let mut last_size = 0u64;
        interval.tick().await;
        loop {
            interval.tick().await;
            let size = match store
                .read_checkpoint()
                .and_then(|note| signer.parse(&note))
            {
                Ok(size) => size,
                Err(e) => {
                    tracing::warn!(error = %e, "stats: failed to read checkpoint");
                    continue;
                }
            };
            tracing::info!(
                size,
                added = size.saturating_sub(last_size),
                latency = %latency.summary(),
                "stats"
            );
            last_size = size;
        }
    });
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
