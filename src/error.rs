use hyper::StatusCode;
use thiserror::Error;

use crate::models::ErrorResponse;

/// Failures raised by the codec library while decoding or re-encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(String),

    #[error("palette quantization failed: {0}")]
    Quantize(String),

    #[error("PNG encoding failed: {0}")]
    PngWrite(#[from] png::EncodingError),

    #[error("PNG optimization failed: {0}")]
    PngOptimize(String),

    #[error("WebP encoding failed: {0}")]
    WebP(String),

    #[error("compression worker stopped unexpectedly: {0}")]
    WorkerPanicked(String),
}

/// Request-level failure. Every variant maps to exactly one HTTP status.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("Unsupported image format. Please upload JPG/PNG/WebP.")]
    UnsupportedFormat,

    #[error("File too large")]
    PayloadTooLarge { limit: usize },

    #[error("Malformed multipart body")]
    MalformedMultipart(String),

    #[error("Compression failed")]
    Codec(#[from] CodecError),
}

impl CompressError {
    pub fn status(&self) -> StatusCode {
        match self {
            CompressError::MissingFile
            | CompressError::UnsupportedFormat
            | CompressError::MalformedMultipart(_) => StatusCode::BAD_REQUEST,
            CompressError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CompressError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller mistakes, as opposed to failures inside the codec.
    pub fn is_rejected_input(&self) -> bool {
        !matches!(self, CompressError::Codec(_))
    }

    pub fn to_response(&self) -> ErrorResponse {
        let details = match self {
            CompressError::MissingFile | CompressError::UnsupportedFormat => None,
            CompressError::PayloadTooLarge { limit } => {
                Some(format!("Maximum upload size is {limit} bytes"))
            }
            CompressError::MalformedMultipart(message) => Some(message.clone()),
            CompressError::Codec(err) => Some(err.to_string()),
        };

        ErrorResponse {
            error: self.to_string(),
            details,
        }
    }
}
