//! Encoder progress line parsing
//!
//! ffmpeg reports progress on stderr with lines such as
//! `frame=   20 fps=0.0 q=2.0 size=      16kB time=00:00:00.86 bitrate= 151.0kbits/s speed=1.72x`.
//! Only the frame counter and the output size are of interest here.

use std::fmt;

/// Frame counter and output size taken from one progress line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Frames encoded so far
    pub frame: u64,
    /// Output size as printed by the encoder, e.g. `16kB`
    pub size: String,
}

impl Progress {
    /// Parse a progress line; `None` unless both counters are present
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim_start().strip_prefix("frame=")?;
        let digits = leading_token(rest, |c| c.is_ascii_digit())?;
        let frame = digits.parse().ok()?;

        let start = line.find("size=")?;
        let size = leading_token(&line[start + "size=".len()..], |c| {
            c.is_alphanumeric() || c == '_'
        })?;

        Some(Self {
            frame,
            size: size.to_string(),
        })
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame: {}, size: {}", self.frame, self.size)
    }
}

/// Skip leading whitespace, then take the longest run matching `accept`
fn leading_token(value: &str, accept: impl Fn(char) -> bool) -> Option<&str> {
    let value = value.trim_start();
    let end = value.find(|c: char| !accept(c)).unwrap_or(value.len());
    if end == 0 {
        None
    } else {
        Some(&value[..end])
    }
}
