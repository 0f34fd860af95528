//! ffmpeg argument templates
//!
//! Every operation maps to a fixed argument vector. Nothing is passed through
//! a shell, so user-supplied text only ever lands inside a single argument.

use super::presets::AspectRatio;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Builder for ffmpeg argument vectors
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<(Vec<OsString>, PathBuf)>,
    output_args: Vec<OsString>,
    output: PathBuf,
}

impl FfmpegCommand {
    /// Start a command writing to `output`
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
        }
    }

    /// Add an input file
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push((Vec::new(), path.as_ref().to_path_buf()));
        self
    }

    /// Add an input file preceded by per-input options
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.inputs.push((
            args.into_iter().map(Into::into).collect(),
            path.as_ref().to_path_buf(),
        ));
        self
    }

    /// Add one output argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add several output arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the video filter chain
    pub fn video_filter(self, filter: impl Into<OsString>) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Output path
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the full argument vector
    ///
    /// Progress is always requested on stdout as key/value lines.
    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostats", "-y", "-v", "error"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push("-progress".into());
        args.push("pipe:1".into());

        for (input_args, path) in &self.inputs {
            args.extend(input_args.iter().cloned());
            args.push("-i".into());
            args.push(path.as_os_str().to_owned());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.as_os_str().to_owned());
        args
    }
}

/// Encoder parameters for a re-encode
#[derive(Clone, Debug, PartialEq)]
pub struct EncodeParams {
    /// Target height; `None` keeps the source size
    pub height: Option<u32>,
    /// Video bitrate used by codecs without CRF support
    pub bitrate: Option<String>,
    /// Video codec, e.g. "libx264"
    pub codec: String,
    /// Encoder preset
    pub preset: String,
    /// Constant rate factor
    pub crf: u8,
    /// AAC bitrate
    pub audio_bitrate: String,
    /// Optional text overlay
    pub watermark: Option<String>,
}

/// Where subtitles go
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtitleMode {
    /// Mux as a selectable track
    Soft,
    /// Burn into the picture
    Hard,
}

/// A media tool operation with its parameters
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Re-encode, optionally scaling and overlaying text
    Encode(EncodeParams),
    /// Cut `[start, end)` in seconds without re-encoding
    Trim {
        /// Start offset in seconds
        start: u64,
        /// End offset in seconds
        end: u64,
    },
    /// Center crop to an aspect ratio
    Crop {
        /// Target ratio
        ratio: AspectRatio,
        /// Encoder parameters for the cropped stream
        encode: EncodeParams,
    },
    /// Add a subtitle file
    AddSubtitles {
        /// Subtitle file
        subtitle: PathBuf,
        /// Soft or hard
        mode: SubtitleMode,
        /// Encoder parameters used when burning
        encode: EncodeParams,
    },
    /// Drop all subtitle streams
    RemoveSubtitles,
    /// Write the first subtitle stream as SRT
    ExtractSubtitles,
    /// Write the audio track as MP3
    ExtractAudio,
    /// Replace the audio track
    ReplaceAudio {
        /// New audio file
        audio: PathBuf,
    },
    /// Drop all audio streams
    RemoveAudio,
    /// Concatenate files listed in the input concat list
    Merge {
        /// Files to join, in order
        parts: Vec<PathBuf>,
    },
    /// Grab one frame as an image
    Thumbnail {
        /// Timestamp, e.g. "00:00:01"
        at: String,
    },
}

impl Operation {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Encode(_) => "encode",
            Operation::Trim { .. } => "trim",
            Operation::Crop { .. } => "crop",
            Operation::AddSubtitles { .. } => "add_subtitles",
            Operation::RemoveSubtitles => "remove_subtitles",
            Operation::ExtractSubtitles => "extract_subtitles",
            Operation::ExtractAudio => "extract_audio",
            Operation::ReplaceAudio { .. } => "replace_audio",
            Operation::RemoveAudio => "remove_audio",
            Operation::Merge { .. } => "merge",
            Operation::Thumbnail { .. } => "thumbnail",
        }
    }

    /// Whether the operation decodes every frame, so frame progress is meaningful
    pub fn reports_frames(&self) -> bool {
        matches!(
            self,
            Operation::Encode(_)
                | Operation::Crop { .. }
                | Operation::AddSubtitles {
                    mode: SubtitleMode::Hard,
                    ..
                }
        )
    }
}

/// One invocation of the media tool
#[derive(Clone, Debug, PartialEq)]
pub struct MediaJob {
    /// Primary input
    pub input: PathBuf,
    /// Output file
    pub output: PathBuf,
    /// What to do
    pub operation: Operation,
}

impl MediaJob {
    /// Create a job
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, operation: Operation) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            operation,
        }
    }

    /// Contents of the concat list for merge jobs
    ///
    /// The list is written to `input` before ffmpeg starts.
    pub fn concat_list(&self) -> Option<String> {
        match &self.operation {
            Operation::Merge { parts } => Some(concat_list(parts)),
            _ => None,
        }
    }

    /// Build the ffmpeg command for this job
    pub fn to_command(&self) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(&self.output);
        match &self.operation {
            Operation::Encode(params) => {
                let cmd = cmd.input(&self.input);
                let cmd = match encode_filter(params, None) {
                    Some(filter) => cmd.video_filter(filter),
                    None => cmd,
                };
                encode_tail(cmd, params)
            }
            Operation::Trim { start, end } => cmd
                .input_with(["-ss".to_string(), start.to_string()], &self.input)
                .args(["-t".to_string(), end.saturating_sub(*start).to_string()])
                .args(["-map", "0", "-c", "copy", "-avoid_negative_ts", "make_zero"]),
            Operation::Crop { ratio, encode } => {
                let filter = encode_filter(encode, Some(ratio.crop_filter()))
                    .unwrap_or_else(|| ratio.crop_filter());
                encode_tail(cmd.input(&self.input).video_filter(filter), encode)
            }
            Operation::AddSubtitles {
                subtitle,
                mode: SubtitleMode::Soft,
                ..
            } => cmd
                .input(&self.input)
                .input(subtitle)
                .args(["-map", "0", "-map", "1:0", "-c", "copy", "-c:s", "mov_text"]),
            Operation::AddSubtitles {
                subtitle,
                mode: SubtitleMode::Hard,
                encode,
            } => {
                let burn = format!("subtitles={}", escape_filter_path(subtitle));
                let filter = encode_filter(encode, Some(burn.clone())).unwrap_or(burn);
                encode_tail(cmd.input(&self.input).video_filter(filter), encode)
            }
            Operation::RemoveSubtitles => cmd
                .input(&self.input)
                .args(["-map", "0", "-map", "-0:s", "-c", "copy"]),
            Operation::ExtractSubtitles => cmd
                .input(&self.input)
                .args(["-map", "0:s:0", "-c:s", "srt"]),
            Operation::ExtractAudio => cmd
                .input(&self.input)
                .args(["-vn", "-map", "0:a:0", "-c:a", "libmp3lame", "-q:a", "2"]),
            Operation::ReplaceAudio { audio } => cmd.input(&self.input).input(audio).args([
                "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-shortest",
            ]),
            Operation::RemoveAudio => cmd
                .input(&self.input)
                .args(["-map", "0", "-map", "-0:a", "-c", "copy"]),
            Operation::Merge { .. } => cmd
                .input_with(["-f", "concat", "-safe", "0"], &self.input)
                .args(["-c", "copy"]),
            Operation::Thumbnail { at } => cmd
                .input_with(["-ss".to_string(), at.clone()], &self.input)
                .args(["-frames:v", "1", "-q:v", "2"]),
        }
    }
}

/// Build the scale/crop/overlay filter chain for an encode
fn encode_filter(params: &EncodeParams, first: Option<String>) -> Option<String> {
    let mut filters: Vec<String> = first.into_iter().collect();
    if let Some(height) = params.height {
        filters.push(format!("scale=-2:{}", height));
    }
    if let Some(text) = params.watermark.as_deref().filter(|t| !t.trim().is_empty()) {
        filters.push(drawtext_filter(text));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

/// Codec, audio and muxing flags shared by all re-encodes
fn encode_tail(cmd: FfmpegCommand, params: &EncodeParams) -> FfmpegCommand {
    let cmd = cmd.args(["-c:v", params.codec.as_str()]);
    let cmd = match params.codec.as_str() {
        "libx264" => cmd
            .args(["-preset", params.preset.as_str()])
            .args(["-crf".to_string(), params.crf.to_string()])
            .args(["-profile:v", "high", "-level", "4.1", "-pix_fmt", "yuv420p"]),
        "libx265" => cmd
            .args(["-preset", params.preset.as_str()])
            .args(["-crf".to_string(), params.crf.to_string()])
            .args(["-tag:v", "hvc1"]),
        _ => match &params.bitrate {
            Some(bitrate) => cmd.args(["-b:v", bitrate.as_str()]),
            None => cmd.args(["-crf".to_string(), params.crf.to_string()]),
        },
    };
    cmd.args(["-c:a", "aac", "-b:a", params.audio_bitrate.as_str(), "-ac", "2"])
        .args(["-movflags", "+faststart"])
        .args(["-map", "0:v:0", "-map", "0:a:0?"])
        .args(["-threads", "0", "-max_muxing_queue_size", "1024"])
}

/// Bottom-left translucent text overlay
pub fn drawtext_filter(text: &str) -> String {
    format!(
        "drawtext=text='{}':fontsize=20:fontcolor=white@0.7:x=10:y=h-th-10:box=1:boxcolor=black@0.4:boxborderw=3",
        escape_drawtext(text)
    )
}

/// Escape text for a single-quoted drawtext value
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => out.push_str("'\\''"),
            '\\' => out.push_str("\\\\"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\n' | '\r' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Escape a path used inside a filter argument
fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        match c {
            '\'' => out.push_str("'\\''"),
            ':' => out.push_str("\\:"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Render an ffmpeg concat demuxer list
pub fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}
