//! Video analysis worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use vgal_analysis::HttpAnalysisClient;
use vgal_queue::{JobQueue, ProgressChannel, RecheckQueueConfig, RedisRecheckQueue};
use vgal_store::RedisVideoStore;
use vgal_worker::{
    metrics, DriverConfig, JobExecutor, Orchestrator, RecheckDriver, StaleVideoWatchdog,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgal=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vgal-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::install_exporter(port) {
            Ok(()) => info!("Serving metrics on port {}", port),
            Err(e) => error!("Failed to start metrics exporter: {}", e),
        }
    }

    let consumer_name = format!("worker-{}", Uuid::new_v4());

    let analysis = match HttpAnalysisClient::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create analysis client: {}", e);
            std::process::exit(1);
        }
    };

    let store = match RedisVideoStore::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to create video store: {}", e);
            std::process::exit(1);
        }
    };

    let rechecks = match RedisRecheckQueue::new(RecheckQueueConfig::from_env(), &consumer_name) {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create re-check queue: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = match ProgressChannel::new(&queue.config().redis_url) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to create notification channel: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(
        Orchestrator::new(
            analysis.clone(),
            analysis,
            store.clone(),
            notifier.clone(),
            rechecks.clone(),
        )
        .with_recheck_delay(config.recheck_delay),
    );

    let driver = RecheckDriver::new(
        rechecks,
        orchestrator.clone(),
        DriverConfig::from(&config),
    );

    let watchdog = StaleVideoWatchdog::new(
        store,
        notifier,
        config.watchdog_interval,
        config.processing_timeout,
    );

    let executor = Arc::new(JobExecutor::new(
        config,
        queue,
        orchestrator,
        driver,
        watchdog,
        consumer_name,
    ));

    tokio::spawn({
        let executor = Arc::clone(&executor);
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            executor.shutdown();
        }
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
