//! Encoder argument construction

use serde::{Deserialize, Serialize};

/// Capture backend passed to `-f` for the input side
const CAPTURE_BACKEND: &str = "dshow";

/// Output container
const OUTPUT_FORMAT: &str = "mpegts";

/// Video codec understood by the receiving MPEG-TS player
const VIDEO_CODEC: &str = "mpeg1video";

/// Parameters of one streaming run
///
/// Built fresh from user input before every start and never changed while
/// the run is active. Values are passed through to the encoder as they are;
/// validating them is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capture device name as reported by the device probe
    pub device: String,
    /// Target frame rate
    pub fps: u32,
    /// Target video bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// Value of the `Authorization` header sent with the stream
    pub auth: String,
    /// Destination URL (http or https)
    pub url: String,
}

/// Build the streaming command line for `config`
pub fn stream_args(config: &StreamConfig) -> Vec<String> {
    vec![
        "-f".to_string(),
        CAPTURE_BACKEND.to_string(),
        "-i".to_string(),
        format!("video={}", config.device),
        "-r".to_string(),
        config.fps.to_string(),
        "-f".to_string(),
        OUTPUT_FORMAT.to_string(),
        "-codec:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-b:v".to_string(),
        format!("{}k", config.bitrate_kbps),
        // B-frames break low-latency playback on the receiving side
        "-bf".to_string(),
        "0".to_string(),
        "-headers".to_string(),
        format!("Authorization: {}", config.auth),
        config.url.clone(),
    ]
}

/// Build the command line that makes the encoder print its device inventory
pub fn probe_args() -> Vec<String> {
    vec![
        "-list_devices".to_string(),
        "1".to_string(),
        "-f".to_string(),
        CAPTURE_BACKEND.to_string(),
        "-i".to_string(),
        "dummy".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> StreamConfig {
        StreamConfig {
            device: "OBS Virtual Camera".to_string(),
            fps: 25,
            bitrate_kbps: 1500,
            auth: "secret".to_string(),
            url: "https://example.org/stream/1".to_string(),
        }
    }

    #[test]
    fn test_stream_args_layout() {
        let args = stream_args(&sample_config());
        assert_eq!(
            args,
            vec![
                "-f",
                "dshow",
                "-i",
                "video=OBS Virtual Camera",
                "-r",
                "25",
                "-f",
                "mpegts",
                "-codec:v",
                "mpeg1video",
                "-b:v",
                "1500k",
                "-bf",
                "0",
                "-headers",
                "Authorization: secret",
                "https://example.org/stream/1",
            ]
        );
    }

    #[test]
    fn test_stream_args_deterministic() {
        let config = sample_config();
        assert_eq!(stream_args(&config), stream_args(&config.clone()));
    }

    #[test]
    fn test_stream_args_url_is_last() {
        let mut config = sample_config();
        config.url = String::new();
        config.auth = String::new();
        let args = stream_args(&config);
        assert_eq!(args.last().map(String::as_str), Some(""));
        assert!(args.contains(&"Authorization: ".to_string()));
    }

    #[test]
    fn test_probe_args() {
        assert_eq!(
            probe_args(),
            vec!["-list_devices", "1", "-f", "dshow", "-i", "dummy"]
        );
    }
}
