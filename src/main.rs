mod cluster;
mod config;
mod context;
mod error;
mod gateway;
mod http;
mod kafka;
mod leadership;
mod lifecycle;
mod metrics;
mod notify;
mod storage;
#[cfg(test)]
mod test_strategies;

use crate::cluster::ClusterClients;
use crate::config::Config;
use crate::context::AppContext;
use crate::http::HttpServer;
use crate::leadership::LeaderElector;
use crate::leadership::elector::ElectorSettings;
use crate::lifecycle::ServiceHandle;
use crate::metrics::MetricsExporter;
use crate::notify::{NotificationDispatcher, build_notifiers};
use crate::storage::OffsetStorage;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lagwatch")]
#[command(about = "Kafka consumer group lag evaluation with leader-elected alerting")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lagwatch.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Starting lagwatch");

    let config = Config::load(Some(&args.config)).context("failed to load configuration")?;
    info!(
        clusters = config.clusters.len(),
        provider = ?config.coordination.provider,
        "Configuration loaded"
    );

    let lock = leadership::connect(&config.coordination)
        .await
        .context("failed to connect to coordination service")?;
    let (elector, leadership) = LeaderElector::new(
        Arc::clone(&lock),
        ElectorSettings::from(&config.coordination),
    );

    let storage = OffsetStorage::start(&config.storage, &config.cluster_names())
        .context("failed to start offset storage")?;
    let notifiers = build_notifiers(&config.notify).context("failed to build notifiers")?;
    let context = AppContext::new(config, storage.client(), leadership);

    let http = HttpServer::new(&context)?
        .start()
        .await
        .context("failed to start HTTP server")?;

    let mut clusters = ClusterClients::from_config(&context.config.clusters);
    clusters
        .start_all(&context.storage)
        .await
        .context("failed to start cluster clients")?;

    let elector = ServiceHandle::spawn("leader-elector", move |shutdown| elector.run(shutdown));
    let dispatcher = NotificationDispatcher::new(
        &context.config.notify,
        context.clusters.clone(),
        context.storage.clone(),
        context.leadership.clone(),
        notifiers,
    );
    let dispatcher = ServiceHandle::spawn("notification-dispatcher", move |shutdown| {
        dispatcher.run(shutdown)
    });

    let exporter = MetricsExporter::new(
        context.storage.clone(),
        context.clusters.clone(),
        Arc::clone(&context.registry),
        context.config.metrics.interval,
    );
    let exporter = ServiceHandle::spawn("metrics-exporter", move |shutdown| exporter.run(shutdown));

    info!(clusters = ?clusters.names(), "lagwatch started");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    exporter.stop().await;
    dispatcher.stop().await;
    elector.stop().await;
    clusters.stop_all().await;
    http.stop().await;
    storage.stop().await;

    if let Err(e) = lock.close().await {
        warn!(error = %e, "Failed to close coordination session");
    }

    info!("lagwatch stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
