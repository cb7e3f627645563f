//! Encoder child process handling
//!
//! A launched encoder is represented by an [`EncoderProcess`]: a receiver of
//! framed stderr lines followed by exactly one exit notification, plus a
//! fire-and-forget kill switch. A per-child watcher task owns the actual
//! `tokio::process::Child`, so the supervisor never blocks on it.

use bytes::BytesMut;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

use super::EncoderError;

/// Output observed from a running encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// One line of stderr text
    Line(String),
    /// The process is gone; always the last item
    Exited { code: Option<i32> },
}

/// Handle to one running encoder process
///
/// Dropping the handle drops the kill switch, which the watcher task treats
/// as a kill request.
#[derive(Debug)]
pub struct EncoderProcess {
    pid: Option<u32>,
    output: mpsc::UnboundedReceiver<EncoderOutput>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl EncoderProcess {
    /// Wrap the channels of a launched process
    pub fn new(
        pid: Option<u32>,
        output: mpsc::UnboundedReceiver<EncoderOutput>,
        kill_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            pid,
            output,
            kill_tx: Some(kill_tx),
        }
    }

    /// OS process id, if known
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Request a forced kill; the exit is reported later through
    /// [`EncoderProcess::next_output`]
    pub fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    /// Wait for the next line or the exit notification
    pub async fn next_output(&mut self) -> EncoderOutput {
        match self.output.recv().await {
            Some(output) => output,
            // Watcher vanished without reporting; treat it as an exit
            None => EncoderOutput::Exited { code: None },
        }
    }
}

/// Something that can start the encoder
///
/// The supervisor only talks to this trait so a scripted launcher can stand
/// in for ffmpeg.
pub trait EncoderLauncher: Send + Sync {
    /// Program being launched, for log messages
    fn program(&self) -> &Path;

    /// Start the encoder with `args`; must be called from within a tokio runtime
    fn launch(&self, args: Vec<String>) -> Result<EncoderProcess, EncoderError>;
}

/// Launches the real ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn program(&self) -> &Path {
        &self.program
    }

    fn launch(&self, args: Vec<String>) -> Result<EncoderProcess, EncoderError> {
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            command.creation_flags(0x0800_0000);
        }

        let mut child = command.spawn().map_err(|source| EncoderError::SpawnFailure {
            program: self.program.clone(),
            source,
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or(EncoderError::MissingPipe("stderr"))?;
        let pid = child.id();

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, stderr, output_tx, kill_rx));

        debug!("Encoder started with pid {:?}", pid);
        Ok(EncoderProcess::new(pid, output_rx, kill_tx))
    }
}

/// Forward stderr lines until the child exits, then report the exit code
async fn watch_child(
    mut child: Child,
    stderr: ChildStderr,
    output_tx: mpsc::UnboundedSender<EncoderOutput>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let mut lines = FramedRead::new(stderr, ProgressLineCodec::default());
    let mut stderr_open = true;
    let mut kill_requested = false;

    let code = loop {
        tokio::select! {
            biased;

            line = lines.next(), if stderr_open => match line {
                Some(Ok(line)) => {
                    let _ = output_tx.send(EncoderOutput::Line(line));
                }
                Some(Err(e)) => {
                    debug!("Encoder stderr read failed: {}", e);
                    stderr_open = false;
                }
                None => stderr_open = false,
            },

            // Fires on an explicit kill and when the handle is dropped
            _ = &mut kill_rx, if !kill_requested => {
                kill_requested = true;
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill encoder: {}", e);
                }
            }

            status = child.wait() => {
                break match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!("Failed to wait for encoder exit: {}", e);
                        None
                    }
                };
            }
        }
    };

    let _ = output_tx.send(EncoderOutput::Exited { code });
}

/// Splits encoder stderr on both `\n` and `\r`
///
/// ffmpeg rewrites its progress line in place with carriage returns, so a
/// plain line codec would hold every update until the process exits.
/// Blank lines are dropped and invalid UTF-8 is replaced.
#[derive(Debug, Default)]
pub struct ProgressLineCodec {
    next_index: usize,
}

impl ProgressLineCodec {
    fn take_line(buf: &mut BytesMut, len: usize, skip: usize) -> String {
        let raw = buf.split_to(len + skip);
        String::from_utf8_lossy(&raw[..len]).trim_end().to_string()
    }
}

impl Decoder for ProgressLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let found = buf[self.next_index..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r');

            let Some(offset) = found else {
                self.next_index = buf.len();
                return Ok(None);
            };

            let line = Self::take_line(buf, self.next_index + offset, 1);
            self.next_index = 0;
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        let len = buf.len();
        let line = Self::take_line(buf, len, 0);
        self.next_index = 0;
        Ok(if line.is_empty() { None } else { Some(line) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<String> {
        let mut codec = ProgressLineCodec::default();
        let mut buf = BytesMut::from(input);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        if let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_codec_splits_on_carriage_return() {
        let lines = decode_all(b"frame=   1 size=1kB\rframe=   2 size=2kB\r");
        assert_eq!(lines, vec!["frame=   1 size=1kB", "frame=   2 size=2kB"]);
    }

    #[test]
    fn test_codec_handles_crlf_and_blank_lines() {
        let lines = decode_all(b"first\r\n\r\nsecond\n");
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_codec_keeps_partial_line_until_eof() {
        let mut codec = ProgressLineCodec::default();
        let mut buf = BytesMut::from(&b"frame=  10"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b" size=4kB\rtail");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("frame=  10 size=4kB")
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("tail"));
    }

    #[test]
    fn test_codec_replaces_invalid_utf8() {
        let lines = decode_all(b"\xff\xfeabc\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("abc"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let launcher = FfmpegLauncher::new("/nonexistent/tscast-ffmpeg");
        let err = launcher.launch(vec!["-version".to_string()]).unwrap_err();
        assert!(matches!(err, EncoderError::SpawnFailure { .. }));
    }

    #[tokio::test]
    async fn test_buffered_lines_delivered_before_closed_channel_exit() {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        let mut process = EncoderProcess::new(Some(42), output_rx, kill_tx);

        output_tx.send(EncoderOutput::Line("hello".to_string())).unwrap();
        process.kill();
        assert!(kill_rx.await.is_ok());

        assert_eq!(
            process.next_output().await,
            EncoderOutput::Line("hello".to_string())
        );
        drop(output_tx);
        assert_eq!(
            process.next_output().await,
            EncoderOutput::Exited { code: None }
        );
        assert_eq!(process.id(), Some(42));
    }

    #[cfg(unix)]
    fn fake_encoder(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    async fn collect_until_exit(process: &mut EncoderProcess) -> Vec<EncoderOutput> {
        let mut seen = Vec::new();
        loop {
            let output = tokio::time::timeout(std::time::Duration::from_secs(10), process.next_output())
                .await
                .expect("encoder did not exit");
            let done = matches!(output, EncoderOutput::Exited { .. });
            seen.push(output);
            if done {
                return seen;
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_lines_then_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_encoder(
            &dir,
            "printf 'frame=   10 size=1kB\\rframe=   75 size=20kB\\r' >&2\nexit 3",
        );

        let mut process = FfmpegLauncher::new(&script).launch(Vec::new()).unwrap();
        assert!(process.id().is_some());

        assert_eq!(
            collect_until_exit(&mut process).await,
            vec![
                EncoderOutput::Line("frame=   10 size=1kB".to_string()),
                EncoderOutput::Line("frame=   75 size=20kB".to_string()),
                EncoderOutput::Exited { code: Some(3) },
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_ends_running_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_encoder(&dir, "exec sleep 30");

        let mut process = FfmpegLauncher::new(&script).launch(Vec::new()).unwrap();
        process.kill();
        // Second kill is a no-op
        process.kill();

        let seen = collect_until_exit(&mut process).await;
        assert_eq!(seen.last(), Some(&EncoderOutput::Exited { code: None }));
    }
}
