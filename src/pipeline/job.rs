//! Job requests and their up-front validation
//!
//! A request is validated completely before a task is registered, so a
//! rejected request never leaves a work directory or a child process behind.

use crate::config::EncodingConfig;
use crate::error::ValidationError;
use crate::media::{
    AspectRatio, EncodeParams, MediaJob, Operation, Resolution, SubtitleMode, compression_crf,
    presets::{MAX_COMPRESSION, MIN_COMPRESSION, RESOLUTIONS},
};
use crate::types::{ChatId, MediaRef, OwnerId, UploadKind};
use crate::utils::{clean_filename, format_clock, is_subtitle_file, parse_time};
use std::path::{Path, PathBuf};

/// Timestamp used when a thumbnail request names none
pub const DEFAULT_THUMBNAIL_AT: u64 = 1;

/// Tallest rendition produced by [`JobKind::EncodeAll`]
pub const ENCODE_ALL_MAX_HEIGHT: u32 = 1080;

/// Name of the concat list written for merge jobs
const CONCAT_LIST_NAME: &str = "concat_list.txt";

/// Subdirectory of the task dir that receives rendered files
const OUTPUT_DIR_NAME: &str = "out";

/// Name used when the platform's file name is unusable
const FALLBACK_NAME: &str = "video";

/// What to do with the submitted media
#[derive(Clone, Debug, PartialEq)]
pub enum JobKind {
    /// Re-encode to a named resolution
    Encode {
        /// Target resolution
        resolution: Resolution,
    },
    /// Re-encode to every resolution up to 1080p, one upload each
    ///
    /// Privileged owners only. A rendition that fails is skipped.
    EncodeAll,
    /// Re-encode at the source size with a lower quality factor
    Compress {
        /// Compression level, 10 to 90
        percent: u8,
    },
    /// Cut a time range without re-encoding
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
    },
    /// Add a subtitle file, soft or burned in
    AddSubtitles {
        /// Subtitle file sent by the owner
        subtitle: MediaRef,
        /// Soft or hard
        mode: SubtitleMode,
    },
    /// Drop all subtitle streams
    RemoveSubtitles,
    /// Extract the first subtitle stream as SRT
    ExtractSubtitles,
    /// Extract the audio track as MP3
    ExtractAudio,
    /// Replace the audio track with another file
    ReplaceAudio {
        /// Audio file sent by the owner
        audio: MediaRef,
    },
    /// Drop all audio streams
    RemoveAudio,
    /// Join the request's media with further videos, in order
    Merge {
        /// Videos appended after the request's media
        others: Vec<MediaRef>,
    },
    /// Grab one frame as a JPEG
    Thumbnail {
        /// Offset in seconds
        at: u64,
    },
    /// Probe the file and reply with a summary
    MediaInfo,
}

impl JobKind {
    /// Parse a resolution name such as `720p` or `4k`
    pub fn encode(resolution: &str) -> Result<Self, ValidationError> {
        Ok(JobKind::Encode {
            resolution: resolution.parse()?,
        })
    }

    /// Compression level in percent
    pub fn compress(percent: u8) -> Result<Self, ValidationError> {
        compression_crf(percent)?;
        Ok(JobKind::Compress { percent })
    }

    /// Parse a trim range from `HH:MM:SS`, `MM:SS` or `SS` strings
    pub fn trim(start: &str, end: &str) -> Result<Self, ValidationError> {
        let start_secs =
            parse_time(start).ok_or_else(|| ValidationError::InvalidTime(start.trim().to_string()))?;
        let end_secs =
            parse_time(end).ok_or_else(|| ValidationError::InvalidTime(end.trim().to_string()))?;
        if start_secs >= end_secs {
            return Err(ValidationError::InvalidTimeRange {
                start: start_secs,
                end: end_secs,
            });
        }
        Ok(JobKind::Trim {
            start: start_secs,
            end: end_secs,
        })
    }

    /// Parse a crop ratio such as `16:9`
    pub fn crop(ratio: &str) -> Result<Self, ValidationError> {
        Ok(JobKind::Crop {
            ratio: ratio.parse()?,
        })
    }

    /// Add a subtitle file; only text subtitle formats are accepted
    pub fn add_subtitles(subtitle: MediaRef, mode: SubtitleMode) -> Result<Self, ValidationError> {
        check_subtitle(&subtitle)?;
        Ok(JobKind::AddSubtitles { subtitle, mode })
    }

    /// Thumbnail at an optional timestamp, default one second in
    pub fn thumbnail(at: Option<&str>) -> Result<Self, ValidationError> {
        let at = match at {
            Some(text) => {
                parse_time(text).ok_or_else(|| ValidationError::InvalidTime(text.trim().to_string()))?
            }
            None => DEFAULT_THUMBNAIL_AT,
        };
        Ok(JobKind::Thumbnail { at })
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Encode { .. } => "encode",
            JobKind::EncodeAll => "encode_all",
            JobKind::Compress { .. } => "compress",
            JobKind::Trim { .. } => "trim",
            JobKind::Crop { .. } => "crop",
            JobKind::AddSubtitles { .. } => "add_subtitles",
            JobKind::RemoveSubtitles => "remove_subtitles",
            JobKind::ExtractSubtitles => "extract_subtitles",
            JobKind::ExtractAudio => "extract_audio",
            JobKind::ReplaceAudio { .. } => "replace_audio",
            JobKind::RemoveAudio => "remove_audio",
            JobKind::Merge { .. } => "merge",
            JobKind::Thumbnail { .. } => "thumbnail",
            JobKind::MediaInfo => "media_info",
        }
    }

    /// Human description used in status texts and captions
    pub fn describe(&self) -> String {
        match self {
            JobKind::Encode { resolution } => format!("Encode to {}", resolution.name),
            JobKind::EncodeAll => "Encode to all qualities".to_string(),
            JobKind::Compress { percent } => format!("Compress by {}%", percent),
            JobKind::Trim { start, end } => format!(
                "Trim {} - {}",
                format_clock(*start as f64),
                format_clock(*end as f64)
            ),
            JobKind::Crop { ratio } => format!("Crop to {}", ratio),
            JobKind::AddSubtitles {
                mode: SubtitleMode::Soft,
                ..
            } => "Add soft subtitles".to_string(),
            JobKind::AddSubtitles {
                mode: SubtitleMode::Hard,
                ..
            } => "Burn subtitles".to_string(),
            JobKind::RemoveSubtitles => "Remove subtitles".to_string(),
            JobKind::ExtractSubtitles => "Extract subtitles".to_string(),
            JobKind::ExtractAudio => "Extract audio".to_string(),
            JobKind::ReplaceAudio { .. } => "Replace audio".to_string(),
            JobKind::RemoveAudio => "Remove audio".to_string(),
            JobKind::Merge { others } => format!("Merge {} videos", others.len() + 1),
            JobKind::Thumbnail { at } => format!("Thumbnail at {}", format_clock(*at as f64)),
            JobKind::MediaInfo => "Media info".to_string(),
        }
    }

    /// Extra files to download besides the request's media
    pub fn extra_media(&self) -> Vec<&MediaRef> {
        match self {
            JobKind::AddSubtitles { subtitle, .. } => vec![subtitle],
            JobKind::ReplaceAudio { audio } => vec![audio],
            JobKind::Merge { others } => others.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the job produces a file to upload
    pub fn produces_file(&self) -> bool {
        !matches!(self, JobKind::MediaInfo)
    }

    /// Whether only privileged owners may submit the job
    pub fn requires_privilege(&self) -> bool {
        matches!(self, JobKind::EncodeAll)
    }

    /// Resolutions rendered by the job, smallest first
    pub fn resolutions(&self) -> Vec<Resolution> {
        match self {
            JobKind::Encode { resolution } => vec![*resolution],
            JobKind::EncodeAll => RESOLUTIONS
                .iter()
                .filter(|r| r.height <= ENCODE_ALL_MAX_HEIGHT)
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// How the result is delivered given the owner's preference
    ///
    /// Audio, image and subtitle outputs always use their own kind.
    pub fn upload_kind(&self, preferred: UploadKind) -> UploadKind {
        match self {
            JobKind::ExtractAudio => UploadKind::Audio,
            JobKind::Thumbnail { .. } => UploadKind::Photo,
            JobKind::ExtractSubtitles => UploadKind::Document,
            _ => preferred,
        }
    }

    fn output_suffixes(&self) -> Vec<String> {
        match self {
            JobKind::Encode { .. } | JobKind::EncodeAll => self
                .resolutions()
                .iter()
                .map(|r| r.name.to_string())
                .collect(),
            other => vec![other.output_suffix()],
        }
    }

    fn output_suffix(&self) -> String {
        match self {
            JobKind::Encode { resolution } => resolution.name.to_string(),
            JobKind::EncodeAll => "all".to_string(),
            JobKind::Compress { .. } => "compressed".to_string(),
            JobKind::Trim { .. } => "trimmed".to_string(),
            JobKind::Crop { .. } => "cropped".to_string(),
            JobKind::AddSubtitles { .. } => "subbed".to_string(),
            JobKind::RemoveSubtitles => "nosubs".to_string(),
            JobKind::ExtractSubtitles => "subs".to_string(),
            JobKind::ExtractAudio => "audio".to_string(),
            JobKind::ReplaceAudio { .. } => "newaudio".to_string(),
            JobKind::RemoveAudio => "muted".to_string(),
            JobKind::Merge { .. } => "merged".to_string(),
            JobKind::Thumbnail { .. } => "thumb".to_string(),
            JobKind::MediaInfo => "info".to_string(),
        }
    }

    fn output_extension<'a>(&self, input_ext: &'a str) -> &'a str {
        match self {
            JobKind::Trim { .. } | JobKind::RemoveSubtitles | JobKind::RemoveAudio => input_ext,
            JobKind::ExtractSubtitles => "srt",
            JobKind::ExtractAudio => "mp3",
            JobKind::Thumbnail { .. } => "jpg",
            _ => "mp4",
        }
    }
}

fn check_subtitle(subtitle: &MediaRef) -> Result<(), ValidationError> {
    let name = subtitle.display_name();
    if is_subtitle_file(Path::new(name)) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSubtitleFile(name.to_string()))
    }
}

/// A request to run one job on one media file
#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    /// Owner submitting the request
    pub owner_id: OwnerId,
    /// Chat that receives status messages and the result
    pub chat: ChatId,
    /// Primary media
    pub media: MediaRef,
    /// Operation to run
    pub kind: JobKind,
}

impl JobRequest {
    /// Create a request
    pub fn new(owner_id: OwnerId, chat: ChatId, media: MediaRef, kind: JobKind) -> Self {
        Self {
            owner_id,
            chat,
            media,
            kind,
        }
    }

    /// Every file the task downloads, primary first
    pub fn downloads(&self) -> Vec<&MediaRef> {
        let mut all = vec![&self.media];
        all.extend(self.kind.extra_media());
        all
    }

    /// Check the request against the owner's size ceiling and input rules
    ///
    /// Each downloaded file must fit under `ceiling` on its own. Jobs that
    /// [require privilege](JobKind::requires_privilege) are refused otherwise.
    pub fn validate(&self, ceiling: u64, privileged: bool) -> Result<(), ValidationError> {
        if self.kind.requires_privilege() && !privileged {
            return Err(ValidationError::PrivilegedOnly(self.kind.describe()));
        }
        for media in self.downloads() {
            if media.file_size > ceiling {
                return Err(ValidationError::FileTooLarge {
                    size: media.file_size,
                    limit: ceiling,
                });
            }
        }

        match &self.kind {
            JobKind::Compress { percent } => {
                if !(MIN_COMPRESSION..=MAX_COMPRESSION).contains(percent) {
                    return Err(ValidationError::CompressionOutOfRange(*percent));
                }
            }
            JobKind::Trim { start, end } if start >= end => {
                return Err(ValidationError::InvalidTimeRange {
                    start: *start,
                    end: *end,
                });
            }
            JobKind::AddSubtitles { subtitle, .. } => check_subtitle(subtitle)?,
            _ => {}
        }
        Ok(())
    }

    /// Local layout of a task's files inside `dir`
    ///
    /// Downloads are prefixed by role and outputs go to their own
    /// subdirectory, so no user-chosen name can collide with another file.
    pub fn layout(&self, dir: &Path) -> FileLayout {
        let primary_name = local_name(self.media.display_name());
        let primary = dir.join(format!("input_{primary_name}"));
        let extras = self
            .kind
            .extra_media()
            .into_iter()
            .enumerate()
            .map(|(i, media)| {
                dir.join(format!("extra_{}_{}", i + 1, local_name(media.display_name())))
            })
            .collect();

        let path = Path::new(&primary_name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_NAME);
        let input_ext = path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
        let output_dir = dir.join(OUTPUT_DIR_NAME);
        let extension = self.kind.output_extension(input_ext);
        let outputs = self
            .kind
            .output_suffixes()
            .into_iter()
            .map(|suffix| output_dir.join(format!("{stem}_{suffix}.{extension}")))
            .collect();

        FileLayout {
            primary,
            extras,
            concat_list: dir.join(CONCAT_LIST_NAME),
            output_dir,
            outputs,
        }
    }

    /// Media tool jobs for this request, in upload order
    ///
    /// Empty when nothing is rendered (media info).
    pub fn media_jobs(
        &self,
        layout: &FileLayout,
        encoding: &EncodingConfig,
        watermark: Option<String>,
    ) -> Vec<MediaJob> {
        let params = |height: Option<u32>, bitrate: Option<&str>, crf: u8| EncodeParams {
            height,
            bitrate: bitrate.map(String::from),
            codec: encoding.codec.clone(),
            preset: encoding.preset.clone(),
            crf,
            audio_bitrate: encoding.audio_bitrate.clone(),
            watermark: watermark.clone(),
        };
        let extra = |i: usize| layout.extras.get(i).cloned().unwrap_or_default();
        let output = layout.outputs.first().cloned().unwrap_or_default();

        let operation = match &self.kind {
            JobKind::Encode { .. } | JobKind::EncodeAll => {
                return self
                    .kind
                    .resolutions()
                    .into_iter()
                    .zip(&layout.outputs)
                    .map(|(resolution, output)| {
                        let encode =
                            params(Some(resolution.height), Some(resolution.bitrate), encoding.crf);
                        MediaJob::new(&layout.primary, output, Operation::Encode(encode))
                    })
                    .collect();
            }
            JobKind::Compress { percent } => Operation::Encode(params(
                None,
                None,
                compression_crf(*percent).unwrap_or(encoding.crf),
            )),
            JobKind::Trim { start, end } => Operation::Trim {
                start: *start,
                end: *end,
            },
            JobKind::Crop { ratio } => Operation::Crop {
                ratio: *ratio,
                encode: params(None, None, encoding.crf),
            },
            JobKind::AddSubtitles { mode, .. } => Operation::AddSubtitles {
                subtitle: extra(0),
                mode: *mode,
                encode: params(None, None, encoding.crf),
            },
            JobKind::RemoveSubtitles => Operation::RemoveSubtitles,
            JobKind::ExtractSubtitles => Operation::ExtractSubtitles,
            JobKind::ExtractAudio => Operation::ExtractAudio,
            JobKind::ReplaceAudio { .. } => Operation::ReplaceAudio { audio: extra(0) },
            JobKind::RemoveAudio => Operation::RemoveAudio,
            JobKind::Merge { .. } => {
                let mut parts = vec![layout.primary.clone()];
                parts.extend(layout.extras.iter().cloned());
                return vec![MediaJob::new(
                    &layout.concat_list,
                    output,
                    Operation::Merge { parts },
                )];
            }
            JobKind::Thumbnail { at } => Operation::Thumbnail { at: at.to_string() },
            JobKind::MediaInfo => return Vec::new(),
        };
        vec![MediaJob::new(&layout.primary, output, operation)]
    }
}

/// Platform file name reduced to a single safe path component
fn local_name(name: &str) -> String {
    let cleaned = clean_filename(name.trim());
    if cleaned.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Where a task keeps its files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLayout {
    /// Downloaded primary media
    pub primary: PathBuf,
    /// Downloaded extra files, in [`JobKind::extra_media`] order
    pub extras: Vec<PathBuf>,
    /// Concat list written for merge jobs
    pub concat_list: PathBuf,
    /// Directory holding rendered files
    pub output_dir: PathBuf,
    /// Rendered files, one per media job
    pub outputs: Vec<PathBuf>,
}
