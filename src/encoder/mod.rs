//! External encoder (ffmpeg) integration
//!
//! Everything that touches the encoder binary lives here: argument
//! construction, stderr framing and progress parsing, the child process
//! wrapper, and the capture device probe.

mod args;
mod devices;
mod process;
mod progress;

pub use args::{probe_args, stream_args, StreamConfig};
pub use devices::list_devices;
pub use process::{EncoderLauncher, EncoderOutput, EncoderProcess, FfmpegLauncher};
pub use progress::Progress;

use thiserror::Error;

/// Errors raised when the encoder binary cannot be run
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The device probe could not be launched
    #[error("failed to launch device probe {program:?}: {source}")]
    ProbeFailure {
        program: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The device probe did not exit in time and was killed
    #[error("device probe did not finish within {0:?}")]
    ProbeTimeout(std::time::Duration),

    /// The streaming invocation could not be launched
    #[error("failed to launch encoder {program:?}: {source}")]
    SpawnFailure {
        program: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spawned, but one of the piped streams was not available
    #[error("encoder {0} stream was not captured")]
    MissingPipe(&'static str),
}
