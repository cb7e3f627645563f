//! Stream supervisor - owns the encoder process and its reconnect policy

mod engine;
mod policy;
mod reconnect;

pub use engine::StreamSupervisor;
pub use policy::{ConnectPolicy, FrameThreshold, DEFAULT_CONNECT_FRAME_THRESHOLD};
pub use reconnect::{ReconnectPolicy, ReconnectTimer};

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};

use crate::encoder::StreamConfig;

/// Commands that can be sent to the supervisor
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    /// Start streaming with the given parameters (ignored while running)
    Start(StreamConfig),
    /// User-initiated stop; never followed by an automatic reconnect
    Stop,
    /// Stop the encoder and end the supervisor loop
    Shutdown,
}

/// Transitions reported to subscribers, in the order they happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Encoder launch attempted; not streaming yet
    Connection {
        /// Automatic attempt number, 0 for a user start
        attempt: u32,
        /// Maximum number of automatic attempts
        max_attempts: u32,
    },
    /// Encoder output shows the stream is flowing
    Connected,
    /// Encoder process is gone, whatever the reason
    Disconnected { exit_code: Option<i32> },
}

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No encoder running
    Idle,
    /// Encoder launched, waiting for progress
    Starting,
    /// Stream is flowing
    Connected,
    /// Kill requested, waiting for the exit
    Stopping,
}

/// Cloneable front door to a running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    status_rx: watch::Receiver<String>,
}

impl SupervisorHandle {
    /// Ask the supervisor to start streaming
    pub async fn start(&self, config: StreamConfig) -> Result<()> {
        self.send(SupervisorCommand::Start(config)).await
    }

    /// Ask the supervisor to stop streaming
    pub async fn stop(&self) -> Result<()> {
        self.send(SupervisorCommand::Stop).await
    }

    /// Stop streaming and end the supervisor loop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SupervisorCommand::Shutdown).await
    }

    /// Subscribe to supervisor events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    /// Live status text, `frame: <n>, size: <s>` while connected, empty otherwise
    pub fn status(&self) -> watch::Receiver<String> {
        self.status_rx.clone()
    }

    async fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.cmd_tx
            .send(command)
            .await
            .context("Stream supervisor is not running")
    }
}

/// Supervisor side of the channels created by [`create_supervisor_channels`]
#[derive(Debug)]
pub struct SupervisorEndpoints {
    pub(crate) cmd_rx: mpsc::Receiver<SupervisorCommand>,
    pub(crate) event_tx: broadcast::Sender<SupervisorEvent>,
    pub(crate) status_tx: watch::Sender<String>,
}

/// Create the command, event and status channels for a supervisor
pub fn create_supervisor_channels() -> (SupervisorHandle, SupervisorEndpoints) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(64);
    let (status_tx, status_rx) = watch::channel(String::new());

    let handle = SupervisorHandle {
        cmd_tx,
        event_tx: event_tx.clone(),
        status_rx,
    };
    let endpoints = SupervisorEndpoints {
        cmd_rx,
        event_tx,
        status_tx,
    };
    (handle, endpoints)
}
