//! StatWatch - device telemetry reporter
//!
//! Samples CPU, memory, temperature, battery and location on a schedule and
//! posts each sample to a chat webhook and a generic HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use statwatch::{
    cli::{Cli, Command},
    config::{Config, ConfigEvent},
    control::ControlServer,
    formatting::{format_text_line, ApiPayload},
    location::LocationAcquisition,
    notification::http_client,
    pipeline::Sampler,
    prefs::{FilePrefs, SavedSettings},
    service::Service,
    sources::SysfsReader,
    task_manager::TaskManager,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Settle time between priming the CPU baseline and sampling in `snapshot`.
const SNAPSHOT_SETTLE: Duration = Duration::from_secs(1);

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        init_logging("info");
        error!(error = %err, "Failed to load configuration");
        std::process::exit(1);
    });

    init_logging(&config.core.log_level);

    match cli.command() {
        Command::Run { now } => run(config, now).await,
        Command::Snapshot { json } => snapshot(config, json).await,
        Command::Save {
            webhook,
            api,
            api_key,
            enable_webhook,
            enable_api,
            enable_periodic,
        } => save(
            &config,
            &ConfigEvent {
                webhook,
                api,
                api_key,
                enable_webhook,
                enable_api,
                enable_periodic,
                trigger_immediate: None,
            },
        ),
    }
}

async fn run(config: Config, now: bool) -> Result<()> {
    info!("StatWatch starting up...");
    info!(
        root = %config.sources.root.display(),
        location = config.location.enabled,
        prefs = %config.prefs.path.display(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task_manager = TaskManager::new(shutdown_rx);

    let listen_addr = config.control.listen_addr;
    let service = Arc::new(Service::builder(config).build()?);

    if let Some(addr) = listen_addr {
        let server = ControlServer::bind(addr, service.clone(), task_manager.shutdown_rx())
            .await
            .with_context(|| format!("Failed to bind control server on {addr}"))?;
        info!(addr = %server.local_addr()?, "Control server listening");
        task_manager.spawn("control-server", server.run());
    }

    service
        .handle_event(&ConfigEvent {
            trigger_immediate: Some(now),
            ..Default::default()
        })
        .await;
    info!(device_id = service.device_id(), "StatWatch running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");

    service.stop();
    let _ = shutdown_tx.send(true);
    task_manager.shutdown().await;

    info!(ticks = service.ticks_completed(), "All tasks shut down. Exiting.");
    Ok(())
}

async fn snapshot(config: Config, json: bool) -> Result<()> {
    let client = http_client(config.http.timeout())?;
    let location = Arc::new(LocationAcquisition::from_config(&config.location, client));
    let mut sampler = Sampler::new(
        Arc::new(SysfsReader::new(config.sources.root.clone())),
        location,
    );

    sampler.prime().await;
    tokio::time::sleep(SNAPSHOT_SETTLE).await;
    let sample = sampler.sample().await;

    if json {
        println!("{}", serde_json::to_string(&ApiPayload::from_sample(&sample))?);
    } else {
        println!("{}", format_text_line(&sample));
    }
    Ok(())
}

fn save(config: &Config, event: &ConfigEvent) -> Result<()> {
    let prefs = FilePrefs::open(&config.prefs.path);
    let mut settings = SavedSettings::load(&prefs);
    settings.update(event);
    settings.save(&prefs)?;
    info!(path = %prefs.path().display(), "Settings saved");
    Ok(())
}
