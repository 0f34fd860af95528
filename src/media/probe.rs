//! ffprobe argument templates and output parsing

use crate::error::MediaError;
use crate::utils::{codec_display_name, format_clock, human_readable_size};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;

/// Frame rate assumed when only the duration is known
pub const ASSUMED_FRAME_RATE: f64 = 24.0;

/// Metadata of a media file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width of the first video stream in pixels
    pub width: u32,
    /// Height of the first video stream in pixels
    pub height: u32,
    /// Codec of the first video stream
    pub codec: String,
    /// Container bitrate in bits/second
    pub bitrate: u64,
    /// Frame rate of the first video stream
    pub fps: f64,
    /// File size in bytes as reported by the container
    pub size: u64,
    /// Audio streams in container order
    pub audio_streams: Vec<AudioStream>,
    /// Number of subtitle streams
    pub subtitle_streams: usize,
}

/// Attributes of one audio stream
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStream {
    /// Audio codec
    pub codec: String,
    /// Channel count
    pub channels: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Language tag, if present
    pub language: Option<String>,
}

impl MediaInfo {
    /// Whether the file has a video stream with known dimensions
    pub fn has_video(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Multi-line summary for the media info command
    pub fn summary(&self, file_name: &str) -> String {
        let mut text = format!(
            "📊 Media Info\n\n📁 File: {}\n⏱ Duration: {}\n💾 Size: {}\n",
            file_name,
            format_clock(self.duration),
            human_readable_size(self.size)
        );
        if self.has_video() {
            text.push_str(&format!(
                "🎬 Video: {} {}x{} @ {:.2} fps\n",
                codec_display_name(&self.codec),
                self.width,
                self.height,
                self.fps
            ));
        }
        if self.bitrate > 0 {
            text.push_str(&format!("📶 Bitrate: {} kb/s\n", self.bitrate / 1000));
        }
        for (i, audio) in self.audio_streams.iter().enumerate() {
            text.push_str(&format!(
                "🎵 Audio #{}: {} {}ch {} Hz{}\n",
                i + 1,
                audio.codec.to_ascii_uppercase(),
                audio.channels,
                audio.sample_rate,
                audio
                    .language
                    .as_deref()
                    .map(|l| format!(" ({})", l))
                    .unwrap_or_default()
            ));
        }
        if self.subtitle_streams > 0 {
            text.push_str(&format!("📝 Subtitles: {}\n", self.subtitle_streams));
        }
        text
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    #[serde(default)]
    tags: Option<FfprobeTags>,
}

#[derive(Debug, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

/// Arguments for a full JSON probe of `path`
pub fn probe_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Arguments that count packets of the first video stream
pub fn count_packets_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-count_packets",
        "-show_entries",
        "stream=nb_read_packets",
        "-of",
        "csv=p=0",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_owned());
    args
}

/// Parse ffprobe's JSON output
pub fn parse_probe_output(json: &[u8]) -> Result<MediaInfo, MediaError> {
    let probe: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| MediaError::Probe(format!("invalid ffprobe output: {}", e)))?;

    let mut info = MediaInfo::default();
    if let Some(format) = &probe.format {
        info.duration = parse_num(format.duration.as_deref()).unwrap_or(0.0);
        info.size = parse_num(format.size.as_deref()).unwrap_or(0);
        info.bitrate = parse_num(format.bit_rate.as_deref()).unwrap_or(0);
    }

    if let Some(video) = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
    {
        info.width = video.width.unwrap_or(0);
        info.height = video.height.unwrap_or(0);
        info.codec = video.codec_name.clone().unwrap_or_default();
        info.fps = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
            .unwrap_or(0.0);
    }

    info.audio_streams = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|s| AudioStream {
            codec: s.codec_name.clone().unwrap_or_default(),
            channels: s.channels.unwrap_or(0),
            sample_rate: parse_num(s.sample_rate.as_deref()).unwrap_or(0),
            language: s.tags.as_ref().and_then(|t| t.language.clone()),
        })
        .collect();

    info.subtitle_streams = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("subtitle"))
        .count();

    Ok(info)
}

/// Parse the packet count printed by [`count_packets_args`]
pub fn parse_packet_count(output: &str) -> Option<u64> {
    output
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
        .filter(|n| *n > 0)
}

/// Best-effort total frame estimate
///
/// Prefers the exact packet count; otherwise assumes [`ASSUMED_FRAME_RATE`].
pub fn estimate_total_frames(packets: Option<u64>, duration: f64) -> u64 {
    match packets {
        Some(n) => n,
        None if duration.is_finite() && duration > 0.0 => {
            (duration * ASSUMED_FRAME_RATE).round() as u64
        }
        None => 0,
    }
}

/// Parse a frame rate string such as "30000/1001" or "29.97"
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    s.trim().parse().ok()
}

fn parse_num<T: std::str::FromStr>(s: Option<&str>) -> Option<T> {
    s.and_then(|v| v.trim().parse().ok())
}
