//! Deciding when a starting encoder counts as connected
//!
//! ffmpeg has no "connected" handshake. A frame counter past a small
//! threshold is used as a sign that the output pipeline has settled; this
//! is a heuristic, not a protocol guarantee.

use crate::encoder::Progress;

/// Frames that must be exceeded before a stream counts as connected
pub const DEFAULT_CONNECT_FRAME_THRESHOLD: u64 = 50;

/// Decides from a progress line whether the stream is flowing
pub trait ConnectPolicy: Send + Sync {
    fn is_connected(&self, progress: &Progress) -> bool;
}

/// Connected once the frame counter is strictly above a threshold
#[derive(Debug, Clone, Copy)]
pub struct FrameThreshold {
    threshold: u64,
}

impl FrameThreshold {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }
}

impl Default for FrameThreshold {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_FRAME_THRESHOLD)
    }
}

impl ConnectPolicy for FrameThreshold {
    fn is_connected(&self, progress: &Progress) -> bool {
        progress.frame > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(frame: u64) -> Progress {
        Progress {
            frame,
            size: "1kB".to_string(),
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let policy = FrameThreshold::default();
        assert!(!policy.is_connected(&progress(10)));
        assert!(!policy.is_connected(&progress(50)));
        assert!(policy.is_connected(&progress(51)));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = FrameThreshold::new(0);
        assert!(!policy.is_connected(&progress(0)));
        assert!(policy.is_connected(&progress(1)));
    }
}
