//! Capture device enumeration
//!
//! Runs `ffmpeg -list_devices 1 -f dshow -i dummy` and reads the device
//! inventory it prints on stderr:
//!
//! ```text
//! [dshow @ 0000016c1590e340] DirectShow video devices (some may be both video and audio devices)
//! [dshow @ 0000016c1590e340]  "OBS Virtual Camera"
//! [dshow @ 0000016c1590e340]     Alternative name "@device_sw_{860BB310-...}"
//! [dshow @ 0000016c1590e340] DirectShow audio devices
//! ```

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{probe_args, EncoderError};

/// Prefix of every line written by the capture backend
const LISTING_PREFIX: &str = "[dshow @ ";

/// Secondary identifier printed under each device
const ALTERNATIVE_NAME_MARKER: &str = "Alternative name";

/// Header that starts the audio part of the inventory
const AUDIO_SECTION_MARKER: &str = "DirectShow audio devices";

/// List video capture devices known to the encoder at `program`
///
/// The probe always exits with a failure status because `dummy` is not a
/// real input; only a failure to launch it is an error.
pub async fn list_devices(program: &Path, timeout: Duration) -> Result<Vec<String>, EncoderError> {
    let mut command = Command::new(program);
    command
        .args(probe_args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        // CREATE_NO_WINDOW
        command.creation_flags(0x0800_0000);
    }

    let probe_failure = |source| EncoderError::ProbeFailure {
        program: program.to_path_buf(),
        source,
    };

    let child = command.spawn().map_err(probe_failure)?;

    // On timeout the child is dropped, which kills it
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| EncoderError::ProbeTimeout(timeout))?
        .map_err(probe_failure)?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!("Device probe output:\n{}", stderr);

    let devices = parse_device_list(&stderr);
    debug!(
        "Device probe exited with {:?}, found {} device(s)",
        output.status.code(),
        devices.len()
    );
    Ok(devices)
}

/// Extract video device names from the probe output, in listed order
pub fn parse_device_list(output: &str) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();

    for line in output.lines() {
        let line = line.trim_start();
        if !line.starts_with(LISTING_PREFIX) || line.contains(ALTERNATIVE_NAME_MARKER) {
            continue;
        }

        if line.contains(AUDIO_SECTION_MARKER) {
            break;
        }

        let Some(name) = quoted_name(line) else {
            continue;
        };

        if !devices.iter().any(|known| known == name) {
            devices.push(name.to_string());
        }
    }

    devices
}

/// Text between the first and the last double quote
fn quoted_name(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let end = line.rfind('"')?;
    if end <= start {
        return None;
    }
    Some(&line[start..end])
}
