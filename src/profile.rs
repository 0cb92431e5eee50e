//! Quality normalization and per-format encoder parameters.
//!
//! Every codec exposes a different compression control. This module turns a
//! single quality scalar into the parameters of the codec matching the
//! detected input format.

use crate::error::CompressError;

pub const MIN_QUALITY: u8 = 10;
pub const MAX_QUALITY: u8 = 100;
pub const DEFAULT_QUALITY: u8 = 70;

/// Highest PNG compression effort level.
pub const PNG_MAX_EFFORT: u8 = 9;

/// Parses the `quality` form field.
///
/// Leading whitespace and an optional sign are accepted, then the longest run
/// of digits is read and anything after it is ignored (`"50abc"` is 50). A
/// field without digits falls back to [`DEFAULT_QUALITY`]. The result is
/// always clamped into `MIN_QUALITY..=MAX_QUALITY`.
pub fn parse_quality(raw: Option<&str>) -> u8 {
    raw.and_then(parse_leading_int)
        .map(clamp_quality)
        .unwrap_or(DEFAULT_QUALITY)
}

pub fn clamp_quality(value: i64) -> u8 {
    value.clamp(MIN_QUALITY as i64, MAX_QUALITY as i64) as u8
}

fn parse_leading_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let run: Vec<u8> = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect();

    if run.is_empty() {
        return None;
    }

    // saturate instead of overflowing on absurdly long inputs
    let magnitude = run
        .iter()
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add(*d as i64));

    Some(if negative { -magnitude } else { magnitude })
}

/// Image format detected from the payload content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Jpeg,
    Png,
    WebP,
    Unsupported,
}

impl DetectedFormat {
    /// Maps a codec format tag (case-insensitive) onto a supported format.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "jpeg" | "jpg" => DetectedFormat::Jpeg,
            "png" => DetectedFormat::Png,
            "webp" => DetectedFormat::WebP,
            _ => DetectedFormat::Unsupported,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DetectedFormat::Jpeg => "image/jpeg",
            DetectedFormat::Png => "image/png",
            DetectedFormat::WebP => "image/webp",
            DetectedFormat::Unsupported => "application/octet-stream",
        }
    }

    pub fn profile(&self, quality: u8) -> Result<CodecProfile, CompressError> {
        let quality = clamp_quality(quality as i64);

        match self {
            DetectedFormat::Jpeg => Ok(CodecProfile::Jpeg { quality }),
            DetectedFormat::Png => Ok(CodecProfile::Png {
                effort: png_effort(quality),
            }),
            DetectedFormat::WebP => Ok(CodecProfile::WebP { quality }),
            DetectedFormat::Unsupported => Err(CompressError::UnsupportedFormat),
        }
    }
}

/// Concrete encoder parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecProfile {
    /// Lossy quality percentage. Always encoded in the optimizing mode.
    Jpeg { quality: u8 },
    /// PNG has no quality scalar: quality is traded for compression effort.
    /// The image is always quantized to a palette.
    Png { effort: u8 },
    WebP { quality: u8 },
}

impl CodecProfile {
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            CodecProfile::Jpeg { .. } => image::ImageFormat::Jpeg,
            CodecProfile::Png { .. } => image::ImageFormat::Png,
            CodecProfile::WebP { .. } => image::ImageFormat::WebP,
        }
    }
}

/// Lower quality means more effort: `round((100 - q) * 9 / 90)`.
pub fn png_effort(quality: u8) -> u8 {
    let span = (MAX_QUALITY - MIN_QUALITY) as f64;
    let effort = ((MAX_QUALITY as f64 - quality as f64) * PNG_MAX_EFFORT as f64 / span).round();
    effort.clamp(0.0, PNG_MAX_EFFORT as f64) as u8
}
