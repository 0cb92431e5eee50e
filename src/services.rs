use crate::codec::ImageCodec;
use crate::error::CompressError;
use crate::models::{CompressResponse, CompressionResult, UploadRequest};
use crate::profile::DetectedFormat;
use crate::utils::{data_url, format_bytes, round_ratio};

pub struct ImageCompressionService<C> {
    codec: C,
}

impl<C: ImageCodec> ImageCompressionService<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Detects the upload's format from its content and re-encodes it in
    /// that same format.
    pub fn compress(&self, upload: &UploadRequest) -> Result<CompressionResult, CompressError> {
        if upload.raw_bytes.is_empty() {
            return Err(CompressError::MissingFile);
        }

        let format = self.detect_format(&upload.raw_bytes);
        let profile = format.profile(upload.requested_quality)?;

        let declared = upload.declared_mime.to_lowercase();
        if !declared.is_empty() && declared != format.mime() && !is_jpg_alias(&declared, format) {
            tracing::warn!(
                filename = %upload.original_filename,
                declared = %upload.declared_mime,
                detected = format.mime(),
                "declared MIME type does not match content"
            );
        }
        tracing::debug!(?profile, "validated");

        let compressed_bytes = self.codec.encode(&upload.raw_bytes, &profile)?;

        let original_size = upload.raw_bytes.len();
        let compressed_size = compressed_bytes.len();
        tracing::debug!(original_size, compressed_size, "encoded");

        let mime = if upload.declared_mime.trim().is_empty() {
            format.mime().to_string()
        } else {
            upload.declared_mime.clone()
        };

        Ok(CompressionResult {
            compressed_bytes,
            format,
            mime,
            original_size,
            compressed_size,
            ratio: round_ratio(original_size, compressed_size),
            requested_quality: upload.requested_quality,
        })
    }

    fn detect_format(&self, bytes: &[u8]) -> DetectedFormat {
        self.codec
            .inspect(bytes)
            .map(|tag| DetectedFormat::from_tag(&tag))
            .unwrap_or(DetectedFormat::Unsupported)
    }

    pub fn create_response(&self, filename: String, result: CompressionResult) -> CompressResponse {
        CompressResponse {
            filename,
            data_url: data_url(&result.mime, &result.compressed_bytes),
            mime: result.mime,
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            ratio: result.ratio,
            requested_quality: result.requested_quality,
            original_size_human: format_bytes(result.original_size),
            compressed_size_human: format_bytes(result.compressed_size),
        }
    }
}

fn is_jpg_alias(declared: &str, format: DetectedFormat) -> bool {
    format == DetectedFormat::Jpeg && matches!(declared, "image/jpg" | "image/pjpeg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NativeCodec;
    use crate::codec::tests::{encoded, gradient};
    use crate::error::CodecError;
    use crate::profile::CodecProfile;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fake codec that reports a fixed tag and returns canned output.
    struct ScriptedCodec {
        tag: Option<&'static str>,
        output: Vec<u8>,
        encode_calls: AtomicUsize,
    }

    impl ScriptedCodec {
        fn new(tag: Option<&'static str>, output: Vec<u8>) -> Self {
            Self {
                tag,
                output,
                encode_calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageCodec for ScriptedCodec {
        fn inspect(&self, _bytes: &[u8]) -> Option<String> {
            self.tag.map(str::to_string)
        }

        fn encode(&self, _bytes: &[u8], _profile: &CodecProfile) -> Result<Vec<u8>, CodecError> {
            self.encode_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn upload(bytes: Vec<u8>, mime: &str, quality: u8) -> UploadRequest {
        UploadRequest {
            raw_bytes: Bytes::from(bytes),
            declared_mime: mime.to_string(),
            original_filename: "upload.bin".to_string(),
            requested_quality: quality,
        }
    }

    #[test]
    fn empty_payload_is_missing_file() {
        let service = ImageCompressionService::new(ScriptedCodec::new(Some("png"), vec![1]));
        let result = service.compress(&upload(Vec::new(), "image/png", 70));

        assert!(matches!(result, Err(CompressError::MissingFile)));
        assert_eq!(service.codec.encode_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsupported_formats_never_reach_the_encoder() {
        for tag in [None, Some("gif"), Some("tiff"), Some("bmp")] {
            let service = ImageCompressionService::new(ScriptedCodec::new(tag, vec![1, 2, 3]));
            let result = service.compress(&upload(b"hello".to_vec(), "image/jpeg", 70));

            assert!(matches!(result, Err(CompressError::UnsupportedFormat)));
            assert_eq!(service.codec.encode_calls.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn zero_byte_output_has_no_ratio() {
        let service = ImageCompressionService::new(ScriptedCodec::new(Some("webp"), Vec::new()));
        let result = service
            .compress(&upload(vec![7; 100], "image/webp", 60))
            .unwrap();

        assert_eq!(result.compressed_size, 0);
        assert_eq!(result.ratio, None);
        assert_eq!(service.codec.encode_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn larger_output_is_not_an_error() {
        let service = ImageCompressionService::new(ScriptedCodec::new(Some("jpg"), vec![0; 400]));
        let result = service
            .compress(&upload(vec![7; 100], "image/jpeg", 90))
            .unwrap();

        assert_eq!(result.format, DetectedFormat::Jpeg);
        assert_eq!(result.ratio, Some(0.25));
    }

    #[test]
    fn response_echoes_declared_mime_and_human_sizes() {
        let service = ImageCompressionService::new(ScriptedCodec::new(Some("png"), vec![0; 1536]));
        let result = service
            .compress(&upload(vec![7; 3072], "application/octet-stream", 10))
            .unwrap();
        let response = service.create_response("shot.png".to_string(), result);

        assert_eq!(response.filename, "shot.png");
        assert_eq!(response.mime, "application/octet-stream");
        assert_eq!(response.ratio, Some(2.0));
        assert_eq!(response.requested_quality, 10);
        assert_eq!(response.original_size_human, "3 KB");
        assert_eq!(response.compressed_size_human, "1.5 KB");
        assert!(
            response
                .data_url
                .starts_with("data:application/octet-stream;base64,")
        );
    }

    #[test]
    fn response_falls_back_to_detected_mime() {
        let service = ImageCompressionService::new(ScriptedCodec::new(Some("png"), vec![0; 1536]));
        let result = service.compress(&upload(vec![7; 3072], "", 10)).unwrap();
        let response = service.create_response("shot.png".to_string(), result);

        assert_eq!(response.mime, "image/png");
        assert_eq!(response.ratio, Some(2.0));
        assert_eq!(response.requested_quality, 10);
        assert_eq!(response.original_size_human, "3 KB");
        assert_eq!(response.compressed_size_human, "1.5 KB");
        assert!(response.data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn real_codec_preserves_every_format() {
        let service = ImageCompressionService::new(NativeCodec::new(Duration::from_secs(10)));
        let img = gradient(48, 32);

        for (format, detected) in [
            (image::ImageFormat::Jpeg, DetectedFormat::Jpeg),
            (image::ImageFormat::Png, DetectedFormat::Png),
            (image::ImageFormat::WebP, DetectedFormat::WebP),
        ] {
            let result = service
                .compress(&upload(encoded(&img, format), "", 50))
                .unwrap();

            assert_eq!(result.format, detected);
            assert_eq!(image::guess_format(&result.compressed_bytes).unwrap(), format);
        }
    }

    #[test]
    fn text_named_like_a_jpeg_is_rejected() {
        let service = ImageCompressionService::new(NativeCodec::new(Duration::from_secs(10)));
        let result = service.compress(&upload(
            b"plain text pretending to be a photo".to_vec(),
            "image/jpeg",
            70,
        ));

        assert!(matches!(result, Err(CompressError::UnsupportedFormat)));
    }
}
