use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamwarden::{
    config::Config,
    database::{ChannelLogRepository, ChannelRepository, Database},
    services::{
        ChannelService, ChannelSupervisor, CommandBuilder, EventBus, HealthMonitor, HwAccelProbe,
        LogPersister, MediaPaths, MediaProber, ProcessStatsCollector, ProgressParser,
        SubscriptionManager,
    },
};

#[derive(Parser)]
#[command(name = "streamwarden")]
#[command(version)]
#[command(about = "Supervisor for long-lived FFmpeg transcoding processes")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "streamwarden.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Media root directory (overrides config file)
    #[arg(short = 'm', long, value_name = "DIR")]
    media_root: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("streamwarden={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting streamwarden v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(media_root) = cli.media_root {
        config.media.base_path = media_root.into();
    }

    info!("Using database: {}", config.database.url);
    info!("Media root: {}", config.media.base_path.display());

    let database = Database::connect(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let channels = ChannelRepository::new(database.pool());
    let logs = ChannelLogRepository::new(database.pool());

    let probe = Arc::new(HwAccelProbe::new(&config.encoder));
    let prober = MediaProber::new(config.encoder.probe_program.clone());

    let (encoder_ok, encoder_version) = probe.encoder_availability().await;
    info!(
        "Encoder: available={}, version={:?}, command={}",
        encoder_ok, encoder_version, config.encoder.program
    );
    if !encoder_ok {
        warn!(
            "Encoder binary '{}' is not runnable; channel starts will fail",
            config.encoder.program
        );
    }
    let (ffprobe_ok, ffprobe_version) = prober.availability().await;
    info!(
        "Probe utility: available={}, version={:?}, command={}",
        ffprobe_ok, ffprobe_version, config.encoder.probe_program
    );

    // prime the capability cache so the first start does not pay for it
    let capabilities = probe.capabilities().await;
    info!(
        "Hardware acceleration: enabled={}, auto={}, accelerators={}",
        config.encoder.hwaccel_enabled,
        config.encoder.hwaccel_auto,
        capabilities
            .accelerators
            .iter()
            .filter(|a| a.available)
            .count()
    );

    let parser = Arc::new(ProgressParser::new());
    let events = EventBus::new(config.supervisor.event_bus_capacity);
    let media = MediaPaths::new(config.media.base_path.clone());
    let builder = CommandBuilder::new(config.encoder.clone(), config.media.base_path.clone());
    let stats = ProcessStatsCollector::new();

    let supervisor = ChannelSupervisor::new(
        channels.clone(),
        builder,
        probe,
        parser,
        events.clone(),
        media.clone(),
        config.supervisor.clone(),
    );

    let persister_handle = LogPersister::new(logs.clone(), config.logs.max_entries_per_channel)
        .spawn(&events);

    let health = HealthMonitor::new(
        supervisor.clone(),
        channels.clone(),
        Duration::from_millis(config.health.check_interval_ms),
    );
    // reconcile once immediately: channels left running by a previous
    // generation get corrected (and restarted where permitted) right away
    if let Err(e) = health.run_once().await {
        error!("Startup reconciliation failed: {e}");
    }
    let health_handle = health.spawn();
    info!(
        "Health loop running every {}",
        humantime::format_duration(Duration::from_millis(config.health.check_interval_ms))
    );

    let fanout = SubscriptionManager::new(
        supervisor.clone(),
        channels.clone(),
        stats.clone(),
        Duration::from_millis(config.health.fanout_interval_ms),
    );

    let service = ChannelService::new(
        channels,
        logs,
        supervisor.clone(),
        fanout.clone(),
        stats,
        prober,
        media,
    );
    let _ = &service; // handed to the operator surface (REST/WebSocket layer)

    info!("Supervisor ready");

    shutdown_signal().await;
    info!("Shutdown signal received");

    health_handle.abort();
    fanout.shutdown();
    supervisor.shutdown().await;
    drop(events);
    persister_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
