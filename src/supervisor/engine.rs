//! Supervisor state machine and event loop
//!
//! All state lives in [`StreamSupervisor`] and is only touched from its own
//! `run` loop, which waits on three things: commands, output of the current
//! encoder, and the reconnect deadline.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::encoder::{stream_args, EncoderLauncher, EncoderOutput, EncoderProcess, Progress, StreamConfig};

use super::reconnect::sleep_until_deadline;
use super::{
    ConnectPolicy, ReconnectPolicy, ReconnectTimer, SupervisorCommand, SupervisorEndpoints,
    SupervisorEvent, SupervisorState,
};

/// How long shutdown waits for a killed encoder to report its exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the encoder process and drives the reconnect policy
pub struct StreamSupervisor {
    /// Starts encoder processes
    launcher: Box<dyn EncoderLauncher>,
    /// Decides when a starting stream is connected
    connect_policy: Box<dyn ConnectPolicy>,
    /// Automatic reconnect budget
    reconnect: ReconnectPolicy,
    /// Pending automatic reconnect, if any
    timer: ReconnectTimer,
    /// Current state
    state: SupervisorState,
    /// The one encoder under supervision
    child: Option<EncoderProcess>,
    /// Parameters of the most recent run, replayed on reconnect
    config: Option<StreamConfig>,
    /// Set by a user stop until the encoder exits
    stop_requested: bool,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    status_tx: watch::Sender<String>,
}

impl StreamSupervisor {
    pub fn new(
        launcher: Box<dyn EncoderLauncher>,
        connect_policy: Box<dyn ConnectPolicy>,
        reconnect: ReconnectPolicy,
        endpoints: SupervisorEndpoints,
    ) -> Self {
        Self {
            launcher,
            connect_policy,
            reconnect,
            timer: ReconnectTimer::default(),
            state: SupervisorState::Idle,
            child: None,
            config: None,
            stop_requested: false,
            cmd_rx: endpoints.cmd_rx,
            event_tx: endpoints.event_tx,
            status_tx: endpoints.status_tx,
        }
    }

    /// Run until a shutdown command arrives or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Stream supervisor started (encoder {:?}, reconnect {:?} x{})",
            self.launcher.program(),
            self.reconnect.delay(),
            self.reconnect.max_attempts()
        );

        loop {
            let deadline = self.timer.deadline();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SupervisorCommand::Start(config)) => self.start(config),
                        Some(SupervisorCommand::Stop) => self.stop(),
                        Some(SupervisorCommand::Shutdown) | None => {
                            info!("Shutdown command received");
                            break;
                        }
                    }
                }

                output = next_child_output(&mut self.child) => {
                    self.handle_output(output);
                }

                _ = sleep_until_deadline(deadline) => {
                    self.fire_reconnect();
                }
            }
        }

        self.shutdown().await;
        info!("Stream supervisor stopped");
        Ok(())
    }

    /// User start: ignored while an encoder runs, otherwise begins a fresh
    /// run with a full reconnect budget
    fn start(&mut self, config: StreamConfig) {
        if self.child.is_some() {
            debug!("Encoder already running, ignoring start");
            return;
        }

        if self.timer.cancel() {
            info!("Pending reconnect replaced by manual start");
        }
        self.reconnect.reset();
        self.launch(config);
    }

    /// User stop: cancels any pending reconnect and kills the encoder
    fn stop(&mut self) {
        if self.timer.cancel() {
            info!("Pending reconnect cancelled");
        }
        self.reconnect.reset();

        let Some(child) = self.child.as_mut() else {
            debug!("No encoder running, nothing to stop");
            return;
        };

        info!("Stopping encoder (pid {:?})", child.id());
        self.stop_requested = true;
        child.kill();
        self.set_state(SupervisorState::Stopping);
    }

    fn launch(&mut self, config: StreamConfig) {
        self.timer.cancel();
        self.stop_requested = false;
        self.set_state(SupervisorState::Starting);
        self.emit(SupervisorEvent::Connection {
            attempt: self.reconnect.attempts(),
            max_attempts: self.reconnect.max_attempts(),
        });

        let args = stream_args(&config);
        info!(
            "Launching encoder for device {:?} -> {} ({} fps, {} kbit/s)",
            config.device, config.url, config.fps, config.bitrate_kbps
        );
        self.config = Some(config);

        match self.launcher.launch(args) {
            Ok(process) => {
                debug!("Encoder running with pid {:?}", process.id());
                self.child = Some(process);
            }
            Err(e) => {
                // Reported like an immediate exit so the reconnect policy applies
                error!("{}", e);
                self.handle_exit(None);
            }
        }
    }

    fn fire_reconnect(&mut self) {
        self.timer.cancel();

        let Some(config) = self.config.clone() else {
            warn!("Reconnect fired without a previous stream configuration");
            return;
        };
        if self.child.is_some() {
            return;
        }

        let attempt = self.reconnect.record_attempt();
        info!(
            "Reconnecting ({}/{})",
            attempt,
            self.reconnect.max_attempts()
        );
        self.launch(config);
    }

    fn handle_output(&mut self, output: EncoderOutput) {
        match output {
            EncoderOutput::Line(line) => self.handle_line(&line),
            EncoderOutput::Exited { code } => {
                self.child = None;
                self.handle_exit(code);
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let Some(progress) = Progress::parse(line) else {
            trace!("encoder: {}", line);
            return;
        };

        match self.state {
            SupervisorState::Starting => {
                if self.connect_policy.is_connected(&progress) {
                    info!("Stream connected ({})", progress);
                    self.set_state(SupervisorState::Connected);
                    self.reconnect.reset();
                    self.emit(SupervisorEvent::Connected);
                    self.status_tx.send_replace(progress.to_string());
                }
            }
            SupervisorState::Connected => {
                self.status_tx.send_replace(progress.to_string());
            }
            SupervisorState::Idle | SupervisorState::Stopping => {}
        }
    }

    fn handle_exit(&mut self, code: Option<i32>) {
        info!("Encoder exited with code {:?}", code);
        self.status_tx.send_replace(String::new());
        self.set_state(SupervisorState::Idle);
        self.emit(SupervisorEvent::Disconnected { exit_code: code });

        if self.stop_requested {
            self.stop_requested = false;
            self.reconnect.reset();
            return;
        }

        if self.reconnect.can_retry() {
            info!(
                "Scheduling reconnect in {:?} ({}/{} used)",
                self.reconnect.delay(),
                self.reconnect.attempts(),
                self.reconnect.max_attempts()
            );
            self.timer.schedule(self.reconnect.delay());
        } else {
            warn!(
                "Giving up after {} reconnect attempts, start again manually",
                self.reconnect.max_attempts()
            );
            self.reconnect.reset();
        }
    }

    /// Kill the encoder and wait briefly for its exit so subscribers still
    /// see the final `Disconnected`
    async fn shutdown(&mut self) {
        self.stop();

        let Some(mut child) = self.child.take() else {
            return;
        };

        let exit = tokio::time::timeout(SHUTDOWN_GRACE, async {
            loop {
                if let EncoderOutput::Exited { code } = child.next_output().await {
                    break code;
                }
            }
        })
        .await;

        match exit {
            Ok(code) => self.handle_exit(code),
            Err(_) => warn!("Encoder did not exit within {:?}", SHUTDOWN_GRACE),
        }
    }

    fn set_state(&mut self, state: SupervisorState) {
        if self.state != state {
            debug!("Supervisor state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

async fn next_child_output(child: &mut Option<EncoderProcess>) -> EncoderOutput {
    match child {
        Some(child) => child.next_output().await,
        None => std::future::pending().await,
    }
}
