use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{info, warn};

use handle_cache::cache::manager::CacheManager;
use handle_cache::config::{Cli, Config};
use handle_cache::fetch::executor::PageFetcher;
use handle_cache::fetch::parser::ChannelPageParser;
use handle_cache::scheduler::breaker::CircuitBreaker;
use handle_cache::scheduler::dispatch::Scheduler;
use handle_cache::server::api::{build_router, AppState};
use handle_cache::store::disk::DiskStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "handle_cache=debug,tower_http=debug"
    } else {
        "handle_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("handle-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        data_dir = %config.storage.data_dir.display(),
        ttl_days = config.cache.ttl_days,
        memory_capacity = config.cache.memory_capacity,
        preset = ?config.pacing.preset,
        "Configuration loaded"
    );

    let data_dir = config.storage.data_dir.clone();
    let listen_addr = config.server.listen.clone();
    let memory_capacity = config.cache.memory_capacity;
    let config = Arc::new(RwLock::new(config));

    // Open durable storage and build the cache tiers.
    let store = Arc::new(DiskStore::open(&data_dir).await?);
    let cache = Arc::new(CacheManager::new(
        config.clone(),
        store.clone(),
        memory_capacity,
    ));

    // Migrate any legacy flat store. Records are written through first; the
    // legacy file is removed only after the migration is durable.
    match store.load_legacy().await {
        Ok(Some(legacy)) if !legacy.is_empty() => {
            cache.migrate_legacy(legacy).await?;
            store.remove_legacy().await?;
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Legacy store unreadable, leaving it in place"),
    }

    // Drop records past the deletion age before serving.
    if let Err(err) = cache.prune_expired().await {
        warn!(error = %err, "Startup prune failed");
    }

    // Breaker, fetcher, and the scheduler loop.
    let breaker = Arc::new(CircuitBreaker::open(config.clone(), &data_dir).await);
    let fetcher = PageFetcher::new(config.clone(), Box::new(ChannelPageParser::new()))
        .map_err(|err| anyhow::anyhow!("failed to build fetcher: {err}"))?;
    let scheduler = Arc::new(Scheduler::new(
        config.clone(),
        cache.clone(),
        breaker,
        Arc::new(fetcher),
    ));
    tokio::spawn(scheduler.clone().run());

    // Build application state and the HTTP router.
    let state = Arc::new(AppState {
        config,
        cache,
        scheduler,
        start_time: Instant::now(),
    });
    let app = build_router(state);

    info!(addr = listen_addr, "Starting server");
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
