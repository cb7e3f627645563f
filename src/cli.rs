//! Command line surface
//!
//! Flags override the last-used settings, and the resolved values must name
//! a device the probe reported.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::encoder::StreamConfig;
use crate::settings::SavedSettings;
use crate::supervisor::SupervisorEvent;

/// Frame rate used when neither a flag nor a saved value is present
pub const DEFAULT_FPS: u32 = 25;

/// Bitrate (kbit/s) used when neither a flag nor a saved value is present
pub const DEFAULT_BITRATE_KBPS: u32 = 1000;

/// Capture a local video device with ffmpeg and push it as MPEG-TS
#[derive(Debug, Parser)]
#[command(name = "tscast", version, about)]
pub struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List video capture devices
    Devices,
    /// Start streaming and keep the stream alive until Ctrl+C
    Stream(StreamArgs),
}

#[derive(Debug, Default, Args)]
pub struct StreamArgs {
    /// Capture device name (default: last used, else the first one found)
    #[arg(long)]
    pub device: Option<String>,

    /// Frame rate
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub fps: Option<u32>,

    /// Video bitrate in kbit/s
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub bitrate: Option<u32>,

    /// Authorization header value
    #[arg(long)]
    pub auth: Option<String>,

    /// Destination URL
    #[arg(long)]
    pub url: Option<String>,

    /// Team name, remembered with the settings
    #[arg(long)]
    pub team: Option<String>,

    /// Nickname, remembered with the settings
    #[arg(long)]
    pub nickname: Option<String>,
}

impl StreamArgs {
    /// Merge flags with saved settings into the parameters of one run
    pub fn resolve(&self, saved: &SavedSettings, devices: &[String]) -> Result<StreamConfig> {
        let device = resolve_device(self.device.as_deref(), saved.device.as_deref(), devices)?;

        let Some(url) = self.url.clone().or_else(|| saved.url.clone()) else {
            bail!("No destination URL given (use --url)");
        };

        let fps = self.fps.or(saved.fps).unwrap_or(DEFAULT_FPS);
        let bitrate_kbps = self
            .bitrate
            .or(saved.bitrate_kbps)
            .unwrap_or(DEFAULT_BITRATE_KBPS);
        if fps == 0 || bitrate_kbps == 0 {
            bail!("Frame rate and bitrate must be positive");
        }

        Ok(StreamConfig {
            device,
            fps,
            bitrate_kbps,
            auth: self.auth.clone().or_else(|| saved.auth.clone()).unwrap_or_default(),
            url,
        })
    }

    /// Settings to remember after a start with `config`
    pub fn to_saved(&self, config: &StreamConfig, saved: &SavedSettings) -> SavedSettings {
        SavedSettings::from_stream(
            config,
            self.team.clone().or_else(|| saved.team.clone()),
            self.nickname.clone().or_else(|| saved.nickname.clone()),
        )
    }
}

fn resolve_device(requested: Option<&str>, saved: Option<&str>, devices: &[String]) -> Result<String> {
    if let Some(requested) = requested {
        if devices.iter().any(|d| d == requested) {
            return Ok(requested.to_string());
        }
        bail!(
            "Unknown capture device {:?}; available: {:?}",
            requested,
            devices
        );
    }

    if let Some(saved) = saved {
        if let Some(device) = devices.iter().find(|d| d.as_str() == saved) {
            return Ok(device.clone());
        }
    }

    match devices.first() {
        Some(device) => Ok(device.clone()),
        None => bail!("No video capture devices found"),
    }
}

/// One-line description of a supervisor event for the operator
pub fn describe_event(event: &SupervisorEvent) -> String {
    match event {
        SupervisorEvent::Connection { attempt: 0, .. } => "Connecting...".to_string(),
        SupervisorEvent::Connection {
            attempt,
            max_attempts,
        } => format!("Reconnecting {}/{}...", attempt, max_attempts),
        SupervisorEvent::Connected => "Streaming".to_string(),
        SupervisorEvent::Disconnected { exit_code } => match exit_code {
            Some(code) => format!("Disconnected (encoder exit code {})", code),
            None => "Disconnected".to_string(),
        },
    }
}

/// Follows supervisor events to tell whether an encoder is running and
/// whether the supervisor has stopped reconnecting on its own
#[derive(Debug, Default)]
pub struct StreamWatch {
    attempt: u32,
    max_attempts: u32,
    running: bool,
    connected: bool,
    gave_up: bool,
}

impl StreamWatch {
    pub fn observe(&mut self, event: &SupervisorEvent) {
        match *event {
            SupervisorEvent::Connection {
                attempt,
                max_attempts,
            } => {
                self.attempt = attempt;
                self.max_attempts = max_attempts;
                self.running = true;
                self.connected = false;
                self.gave_up = false;
            }
            SupervisorEvent::Connected => self.connected = true,
            SupervisorEvent::Disconnected { .. } => {
                // A connected run resets the budget before it ends
                let used = if self.connected { 0 } else { self.attempt };
                self.running = false;
                self.gave_up = used >= self.max_attempts;
            }
        }
    }

    /// An encoder was launched and has not exited yet
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The last exit used up the reconnect budget; no restart will follow
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }
}
