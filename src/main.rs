//! tscast
//!
//! Captures a local video device with ffmpeg, pushes it as MPEG-TS to an
//! HTTP ingest endpoint and keeps the stream alive across encoder crashes.

mod cli;
mod config;
mod encoder;
mod logging;
mod settings;
mod supervisor;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use cli::{describe_event, Cli, Command, StreamArgs, StreamWatch};
use config::Config;
use encoder::{list_devices, FfmpegLauncher};
use settings::SettingsStore;
use supervisor::{
    create_supervisor_channels, StreamSupervisor, SupervisorEvent, SupervisorHandle,
};

/// Minimum spacing between progress lines in the log
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let _log_guard = logging::init_logging(config.logging.file_logging)?;
    info!("Configuration loaded from {:?}", config.config_path().ok());

    let runtime = tokio::runtime::Runtime::new()?;

    let result = runtime.block_on(run(cli.command, &config));

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Devices => print_devices(config).await,
        Command::Stream(args) => stream(config, args).await,
    }
}

async fn print_devices(config: &Config) -> Result<()> {
    let devices = list_devices(&config.encoder.ffmpeg_path, config.probe_timeout())
        .await
        .context("Failed to list capture devices")?;

    if devices.is_empty() {
        println!("No capture devices found");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

async fn stream(config: &Config, args: StreamArgs) -> Result<()> {
    let devices = list_devices(&config.encoder.ffmpeg_path, config.probe_timeout())
        .await
        .context("Failed to list capture devices")?;
    info!("Found {} capture device(s): {:?}", devices.len(), devices);

    let store = SettingsStore::default_location()?;
    let saved = store.load();
    debug!("Saved settings read from {:?}", store.path());
    let stream_config = args.resolve(&saved, &devices)?;

    let (handle, endpoints) = create_supervisor_channels();
    let mut events = handle.subscribe();
    let mut status = handle.status();

    let supervisor = StreamSupervisor::new(
        Box::new(FfmpegLauncher::new(config.encoder.ffmpeg_path.clone())),
        Box::new(config.connect_policy()),
        config.reconnect_policy(),
        endpoints,
    );
    let mut supervisor_task = tokio::spawn(supervisor.run());

    // First Ctrl+C stops the stream, a second one forces shutdown
    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;

    info!(
        "Streaming {:?} to {} at {} fps, {} kbit/s",
        stream_config.device, stream_config.url, stream_config.fps, stream_config.bitrate_kbps
    );
    handle.start(stream_config.clone()).await?;
    store.save(&args.to_saved(&stream_config, &saved));

    let mut watch = StreamWatch::default();
    let mut stopping = false;
    let mut gave_up = false;
    let mut last_status_log: Option<Instant> = None;
    let mut status_open = true;

    let outcome = loop {
        tokio::select! {
            joined = &mut supervisor_task => {
                break joined.context("Stream supervisor task failed")?;
            }

            Some(()) = interrupts.recv() => {
                if stopping {
                    info!("Ctrl+C received again, shutting down...");
                    request_shutdown(&handle).await;
                    continue;
                }

                info!("Ctrl+C received, stopping stream (press again to force)");
                stopping = true;
                if let Err(e) = handle.stop().await {
                    debug!("{}", e);
                }
                if !watch.is_running() {
                    request_shutdown(&handle).await;
                }
            }

            event = events.recv() => match event {
                Ok(event) => {
                    info!("{}", describe_event(&event));
                    watch.observe(&event);

                    if matches!(event, SupervisorEvent::Disconnected { .. }) {
                        if stopping {
                            request_shutdown(&handle).await;
                        } else if watch.gave_up() {
                            gave_up = true;
                            request_shutdown(&handle).await;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Missed {} supervisor events", n),
                Err(RecvError::Closed) => {}
            },

            changed = status.changed(), if status_open => {
                if changed.is_err() {
                    status_open = false;
                    continue;
                }
                let text = status.borrow_and_update().clone();
                let due = last_status_log.map_or(true, |at| at.elapsed() >= STATUS_LOG_INTERVAL);
                if !text.is_empty() && due {
                    info!("{}", text);
                    last_status_log = Some(Instant::now());
                }
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        info!("{}", describe_event(&event));
    }

    outcome?;
    if gave_up {
        bail!(
            "Stream lost after {} reconnect attempt(s); run tscast stream again",
            config.supervisor.max_reconnect_attempts
        );
    }

    info!("Shutdown complete");
    Ok(())
}

async fn request_shutdown(handle: &SupervisorHandle) {
    // The supervisor may already be gone
    if let Err(e) = handle.shutdown().await {
        debug!("{}", e);
    }
}
