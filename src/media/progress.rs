//! Parsing of ffmpeg's `-progress pipe:1` key/value stream

use regex::Regex;
use std::sync::OnceLock;

static FRAME_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn frame_pattern() -> Option<&'static Regex> {
    FRAME_PATTERN
        .get_or_init(|| Regex::new(r"^\s*frame=\s*(\d+)\s*$").ok())
        .as_ref()
}

/// Latest values reported by the progress stream
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FfmpegProgress {
    /// Frames written so far
    pub frame: u64,
    /// Current encoding frame rate
    pub fps: f64,
    /// Output timestamp in microseconds
    pub out_time_us: i64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    /// Set once ffmpeg reports `progress=end`
    pub is_complete: bool,
}

/// Extract the frame counter from a single `frame=N` line
pub fn parse_frame(line: &str) -> Option<u64> {
    frame_pattern()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

impl FfmpegProgress {
    /// Fold one line into the running state
    ///
    /// Returns the frame counter when the line carried one, so callers can
    /// report at most once per line.
    pub fn apply_line(&mut self, line: &str) -> Option<u64> {
        if let Some(frame) = parse_frame(line) {
            self.frame = frame;
            return Some(frame);
        }

        let (key, value) = line.trim().split_once('=')?;
        match key {
            "fps" => {
                if let Ok(fps) = value.parse() {
                    self.fps = fps;
                }
            }
            "out_time_us" | "out_time_ms" => {
                // ffmpeg reports microseconds under both keys
                if let Ok(us) = value.parse() {
                    self.out_time_us = us;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" if value == "end" => self.is_complete = true,
            _ => {}
        }
        None
    }
}
