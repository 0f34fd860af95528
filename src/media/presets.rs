//! Named encoder presets: resolutions, aspect ratios and compression levels

use crate::error::ValidationError;
use std::str::FromStr;

/// Target resolution with its video bitrate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Name users type, e.g. "720p"
    pub name: &'static str,
    /// Output height in pixels; width keeps the aspect ratio
    pub height: u32,
    /// Video bitrate for codecs without CRF support
    pub bitrate: &'static str,
}

/// Supported resolutions, smallest first
pub const RESOLUTIONS: [Resolution; 7] = [
    Resolution { name: "144p", height: 144, bitrate: "128k" },
    Resolution { name: "240p", height: 240, bitrate: "256k" },
    Resolution { name: "360p", height: 360, bitrate: "512k" },
    Resolution { name: "480p", height: 480, bitrate: "1M" },
    Resolution { name: "720p", height: 720, bitrate: "2M" },
    Resolution { name: "1080p", height: 1080, bitrate: "4M" },
    Resolution { name: "2160p", height: 2160, bitrate: "8M" },
];

impl FromStr for Resolution {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = if wanted == "4k" { "2160p".to_string() } else { wanted };
        RESOLUTIONS
            .iter()
            .find(|r| r.name == wanted)
            .copied()
            .ok_or_else(|| ValidationError::UnknownResolution(s.trim().to_string()))
    }
}

/// Aspect ratios supported by center cropping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AspectRatio {
    /// 16:9 widescreen
    Wide,
    /// 9:16 vertical
    Vertical,
    /// 1:1 square
    Square,
    /// 4:3 classic
    Classic,
    /// 3:4 portrait
    Portrait,
    /// 21:9 cinema
    Cinema,
}

impl AspectRatio {
    /// Width and height terms of the ratio
    pub fn terms(&self) -> (u32, u32) {
        match self {
            AspectRatio::Wide => (16, 9),
            AspectRatio::Vertical => (9, 16),
            AspectRatio::Square => (1, 1),
            AspectRatio::Classic => (4, 3),
            AspectRatio::Portrait => (3, 4),
            AspectRatio::Cinema => (21, 9),
        }
    }

    /// Center-crop filter for this ratio
    ///
    /// Keeps the largest centered window of the requested shape and rounds
    /// both sides down to even numbers for yuv420p.
    pub fn crop_filter(&self) -> String {
        let (w, h) = self.terms();
        format!(
            "crop='trunc(min(iw,ih*{w}/{h})/2)*2':'trunc(min(ih,iw*{h}/{w})/2)*2'",
            w = w,
            h = h
        )
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.terms();
        write!(f, "{}:{}", w, h)
    }
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Wide),
            "9:16" => Ok(AspectRatio::Vertical),
            "1:1" => Ok(AspectRatio::Square),
            "4:3" => Ok(AspectRatio::Classic),
            "3:4" => Ok(AspectRatio::Portrait),
            "21:9" => Ok(AspectRatio::Cinema),
            other => Err(ValidationError::UnsupportedAspectRatio(other.to_string())),
        }
    }
}

/// Lowest accepted compression percentage
pub const MIN_COMPRESSION: u8 = 10;
/// Highest accepted compression percentage
pub const MAX_COMPRESSION: u8 = 90;

/// Map a compression percentage to a CRF value
///
/// 10% maps to CRF 21, 90% to CRF 47.
pub fn compression_crf(percent: u8) -> Result<u8, ValidationError> {
    if !(MIN_COMPRESSION..=MAX_COMPRESSION).contains(&percent) {
        return Err(ValidationError::CompressionOutOfRange(percent));
    }
    Ok(18 + (u32::from(percent) * 33 / 100) as u8)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_lookup() {
        let r: Resolution = "720p".parse().unwrap();
        assert_eq!((r.height, r.bitrate), (720, "2M"));
        assert_eq!("4K".parse::<Resolution>().unwrap().height, 2160);
        assert_eq!(
            "999p".parse::<Resolution>().unwrap_err(),
            ValidationError::UnknownResolution("999p".into())
        );
    }

    #[test]
    fn resolutions_are_ascending() {
        assert!(RESOLUTIONS.windows(2).all(|w| w[0].height < w[1].height));
    }

    #[test]
    fn aspect_ratios_parse_and_render() {
        for text in ["16:9", "9:16", "1:1", "4:3", "3:4", "21:9"] {
            let ratio: AspectRatio = text.parse().unwrap();
            assert_eq!(ratio.to_string(), text);
        }
        assert!("5:4".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn crop_filter_uses_ratio_terms() {
        assert_eq!(
            AspectRatio::Vertical.crop_filter(),
            "crop='trunc(min(iw,ih*9/16)/2)*2':'trunc(min(ih,iw*16/9)/2)*2'"
        );
    }

    #[test]
    fn compression_maps_to_crf() {
        assert_eq!(compression_crf(10).unwrap(), 21);
        assert_eq!(compression_crf(50).unwrap(), 34);
        assert_eq!(compression_crf(90).unwrap(), 47);
        assert_eq!(
            compression_crf(95).unwrap_err(),
            ValidationError::CompressionOutOfRange(95)
        );
        assert!(compression_crf(9).is_err());
    }
}
