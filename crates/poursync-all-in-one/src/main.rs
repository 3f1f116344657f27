mod config;

use anyhow::{Context, Result};
use common::postgres::{PostgresClient, PostgresDirectoryRepository, PostgresPourEventLedger};
use std::sync::Arc;
use std::time::Duration;
use sync_worker::{
    ConnectivityMonitor, FilePourQueueStore, SyncPolicy, SyncWorker, SyncWorkerConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let config = match config::ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting poursync-all-in-one service");
    info!("Configuration: {:?}", config);

    let token = CancellationToken::new();
    spawn_signal_handlers(token.clone());

    if let Err(e) = run_service(token, config).await {
        error!("Service error: {:#}", e);
        std::process::exit(1);
    }

    info!("poursync-all-in-one stopped");
}

async fn run_service(token: CancellationToken, config: config::ServiceConfig) -> Result<()> {
    let postgres = PostgresClient::new(
        &config.postgres_host,
        config.postgres_port,
        &config.postgres_database,
        &config.postgres_username,
        &config.postgres_password,
        config.postgres_max_pool_size,
    )
    .context("creating postgres client")?;
    postgres.ping().await.context("pinging postgres")?;

    let directory = Arc::new(PostgresDirectoryRepository::new(postgres.clone()));
    let ledger = Arc::new(PostgresPourEventLedger::new(postgres));

    let queue = Arc::new(
        FilePourQueueStore::load(&config.queue_path)
            .await
            .context("loading queue snapshot")?,
    );

    let monitor = ConnectivityMonitor::new(config.start_online);

    let worker = SyncWorker::new(
        queue,
        directory,
        ledger,
        monitor,
        SyncWorkerConfig {
            policy: SyncPolicy {
                max_sync_attempts: config.max_sync_attempts,
                backoff_base: Duration::from_secs(config.backoff_base_secs),
                backoff_cap: Duration::from_secs(config.backoff_cap_secs),
            },
            sync_interval: Duration::from_secs(config.sync_interval_secs),
        },
        token.clone(),
    );

    worker.run(token).await
}

/// SIGINT/SIGTERM cancel the token; the worker finishes its current queue
/// entry and stops between entries
fn spawn_signal_handlers(token: CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_token.cancel();
            }
            Err(err) => {
                error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM signal");
                    token.cancel();
                }
                Err(err) => {
                    error!("Error setting up SIGTERM handler: {}", err);
                }
            }
        });
    }
}
