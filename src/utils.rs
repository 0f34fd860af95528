//! Formatting helpers and small path/name utilities
//!
//! Everything here is pure and synchronous so it can be called from progress
//! callbacks without suspending.

use std::path::Path;

/// Size units used by [`human_readable_size`]
const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Glyph for the filled part of a progress bar
pub const BAR_FILLED: char = '●';

/// Glyph for the empty part of a progress bar
pub const BAR_EMPTY: char = '○';

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg",
];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "aac", "ogg", "wav", "flac", "m4a", "wma"];
const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "vtt", "sub"];

/// Convert a byte count into a 1024-based human readable string
///
/// # Examples
///
/// ```
/// use encoder_bot::utils::human_readable_size;
///
/// assert_eq!(human_readable_size(0), "0 B");
/// assert_eq!(human_readable_size(1536), "1.50 KB");
/// ```
#[must_use]
pub fn human_readable_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, SIZE_UNITS[unit])
}

/// Format a transfer rate in bytes per second
#[must_use]
pub fn human_readable_rate(bytes_per_sec: f64) -> String {
    let bytes = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec as u64
    } else {
        0
    };
    format!("{}/s", human_readable_size(bytes))
}

/// Format a duration in seconds as `1h 2m 3s`, `2m 3s` or `3s`
///
/// Negative and non-finite values are treated as zero.
///
/// # Examples
///
/// ```
/// use encoder_bot::utils::format_time;
///
/// assert_eq!(format_time(3723.0), "1h 2m 3s");
/// assert_eq!(format_time(59.9), "59s");
/// ```
#[must_use]
pub fn format_time(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format a duration in seconds as `HH:MM:SS`
#[must_use]
pub fn format_clock(seconds: f64) -> String {
    let total = whole_seconds(seconds);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn whole_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    }
}

/// Build a fixed-width progress bar, e.g. `[ ●●●○○○ ] >> 50.0%`
///
/// The bar always has exactly `width` glyphs; the percentage is clamped to
/// `0.0..=100.0` before filling.
#[must_use]
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let pct = clamp_percentage(percentage);
    let filled = ((pct / 100.0) * width as f64) as usize;
    let filled = filled.min(width);

    let mut bar = String::with_capacity(width * 3);
    bar.extend(std::iter::repeat_n(BAR_FILLED, filled));
    bar.extend(std::iter::repeat_n(BAR_EMPTY, width - filled));

    format!("[ {} ] >> {:.1}%", bar, pct)
}

/// Clamp a percentage into `0.0..=100.0`, mapping NaN to zero
#[must_use]
pub fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

/// Parse `HH:MM:SS`, `MM:SS` or `SS` into seconds
///
/// Returns `None` for malformed input instead of silently mapping it to zero,
/// and for values that do not fit in `u64` seconds.
#[must_use]
pub fn parse_time(input: &str) -> Option<u64> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    let nums: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
    let nums = nums?;

    match nums.as_slice() {
        [h, m, s] => h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s),
        [m, s] => m.checked_mul(60)?.checked_add(*s),
        [s] => Some(*s),
        _ => None,
    }
}

/// Replace characters that are invalid in filenames with `_`
#[must_use]
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn has_extension(path: &Path, list: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| list.iter().any(|known| known.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Check if a path looks like a video file by extension
#[must_use]
pub fn is_video_file(path: &Path) -> bool {
    has_extension(path, VIDEO_EXTENSIONS)
}

/// Check if a path looks like an audio file by extension
#[must_use]
pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_EXTENSIONS)
}

/// Check if a path looks like a subtitle file by extension
#[must_use]
pub fn is_subtitle_file(path: &Path) -> bool {
    has_extension(path, SUBTITLE_EXTENSIONS)
}

/// Readable codec name for captions
#[must_use]
pub fn codec_display_name(codec: &str) -> String {
    match codec.to_ascii_lowercase().as_str() {
        "libx264" => "H.264/AVC".to_string(),
        "libx265" => "H.265/HEVC".to_string(),
        "libvpx-vp9" => "VP9".to_string(),
        "libvpx" => "VP8".to_string(),
        "mpeg4" => "MPEG-4".to_string(),
        "h264" => "H.264".to_string(),
        "hevc" => "H.265".to_string(),
        _ => codec.to_ascii_uppercase(),
    }
}

/// Describe the visual quality implied by a CRF value
#[must_use]
pub fn quality_description(crf: u8) -> &'static str {
    match crf {
        0..=17 => "Visually Lossless",
        18..=23 => "High Quality",
        24..=28 => "Medium Quality",
        29..=34 => "Low Quality",
        _ => "Very Low Quality",
    }
}

/// Truncate text to at most `max` characters, marking the cut with `…`
///
/// Cuts on a character boundary so multi-byte output from external tools
/// never panics.
#[must_use]
pub fn truncate_for_user(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}
