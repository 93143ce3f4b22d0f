use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use lib_ranking::configs::Settings;
use lib_ranking::connections::{RankingCache, Repository};
use lib_ranking::core::{Hub, LeaderboardService, SyncWorker};
use lib_ranking::ingestors::ScoreConsumer;

mod leaderboard_logic;
use leaderboard_logic::state::AppState;
use leaderboard_logic::{http, logger};

/// Total budget for the ordered shutdown sequence.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[clap(name = "server_leaderboard", about = "Realtime leaderboard service")]
struct Args {
    #[clap(long, env = "LEADERBOARD_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    #[clap(long, env = "LEADERBOARD_LOG_DIR", default_value = "./logs")]
    log_dir: PathBuf,

    #[clap(long, env = "LEADERBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::setup_logging(&args.log_dir, &args.log_level)?;

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("failed to load config file, using defaults: {err}");
            Settings::default()
        }
    };

    log::info!("connecting to Redis at {}", settings.redis.addr);
    let cache = RankingCache::connect(&settings.redis)
        .await
        .context("connecting to Redis")?;
    log::info!("connected to Redis");

    log::info!(
        "connecting to PostgreSQL at {}:{}/{}",
        settings.postgres.host,
        settings.postgres.port,
        settings.postgres.database
    );
    let repository = Repository::connect(&settings.postgres)
        .await
        .context("connecting to PostgreSQL")?;
    repository
        .run_migrations()
        .await
        .context("running migrations")?;

    // Fan-out coordinator.
    let (hub, hub_handle) = Hub::new();
    let hub_task = tokio::spawn(hub.run());

    let service = Arc::new(LeaderboardService::new(
        cache.clone(),
        repository.clone(),
        settings.leaderboard.clone(),
        hub_handle.clone(),
    ));

    // Rebuild the hot index before any surface opens, so no request ever
    // observes an empty index after a restart.
    let sync_worker = SyncWorker::new(cache.clone(), repository.clone(), settings.sync.clone());
    if let Err(err) = sync_worker.sync_all_from_cold().await {
        log::warn!("startup recovery from database failed: {err}");
    }
    if settings.sync.enabled {
        sync_worker.start().await;
    }

    let consumer = if settings.kafka.enabled {
        let consumer = ScoreConsumer::new(settings.kafka.clone(), Arc::clone(&service));
        consumer.start().await;
        Some(consumer)
    } else {
        None
    };

    let state = AppState {
        service: Arc::clone(&service),
        hub: hub_handle.clone(),
    };
    let app = http::router(state)
        .layer(tower_http::timeout::TimeoutLayer::new(settings.server.write_timeout));

    let addr = format!("0.0.0.0:{}", settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("HTTP server listening on {addr}, websocket endpoint at /ws");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.recv().await;
            })
            .await;
        if let Err(err) = result {
            log::error!("HTTP server error: {err}");
        }
    });

    wait_for_signal().await;
    log::info!("shutting down server...");
    let _ = shutdown_tx.send(());

    // Ordered teardown: requests first, then fan-out, then ingestion, then
    // the sync worker; store clients close last.
    let shutdown = async {
        let _ = server_task.await;
        hub_handle.shutdown().await;
        let _ = hub_task.await;
        if let Some(consumer) = &consumer {
            consumer.stop().await;
        }
        sync_worker.stop().await;
        repository.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, shutdown).await.is_err() {
        log::error!("shutdown did not finish within {SHUTDOWN_BUDGET:?}");
    }

    log::info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }
}
