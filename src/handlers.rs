use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};
use multer::{Constraints, SizeLimit};
use serde::Serialize;
use serde_json::json;

use crate::codec::NativeCodec;
use crate::config::{AppConfig, CorsConfig};
use crate::error::{CodecError, CompressError};
use crate::models::{CompressResponse, UploadRequest};
use crate::profile::parse_quality;
use crate::services::ImageCompressionService;

/// Stateless request handler, built once at start-up and shared across
/// connections.
pub struct ImageHandler {
    compression_service: Arc<ImageCompressionService<NativeCodec>>,
    cors_config: CorsConfig,
    max_upload_size: usize,
}

/// Fields pulled out of the multipart form before validation.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Bytes>,
    filename: String,
    declared_mime: String,
    quality: Option<String>,
}

impl ImageHandler {
    pub fn new(config: &AppConfig) -> Self {
        let codec = NativeCodec::new(config.compression.png_optimize_timeout);

        Self {
            compression_service: Arc::new(ImageCompressionService::new(codec)),
            cors_config: config.cors.clone(),
            max_upload_size: config.compression.max_upload_size,
        }
    }

    pub async fn handle_http_request(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, Infallible> {
        let origin = req
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if req.method() == Method::OPTIONS {
            return Ok(self.create_cors_response(StatusCode::OK, Body::empty(), origin.as_deref()));
        }

        if req.method() == Method::POST && req.uri().path() == "/compress" {
            let response = match self.process_compress(req).await {
                Ok(body) => self.json_response(StatusCode::OK, &body, origin.as_deref()),
                Err(err) => {
                    if err.is_rejected_input() {
                        tracing::warn!(error = %err, status = %err.status(), "rejected input");
                    } else {
                        tracing::error!(error = %err, details = ?err.to_response().details, "encode failed");
                    }
                    self.json_response(err.status(), &err.to_response(), origin.as_deref())
                }
            };
            return Ok(response);
        }

        Ok(self.json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "Not Found" }),
            origin.as_deref(),
        ))
    }

    async fn process_compress(&self, req: Request<Body>) -> Result<CompressResponse, CompressError> {
        let content_type = self.get_content_type(req.headers());
        tracing::debug!(content_type = ?content_type, "received");

        let form = match content_type.as_deref() {
            Some(value) if self.is_multipart_content_type(value) => {
                self.extract_upload_form(value, req.into_body()).await?
            }
            _ => return Err(CompressError::MissingFile),
        };

        let upload = self.build_upload(form)?;
        let filename = upload.original_filename.clone();

        let service = Arc::clone(&self.compression_service);
        let result = tokio::task::spawn_blocking(move || service.compress(&upload))
            .await
            .map_err(|e| CodecError::WorkerPanicked(e.to_string()))??;

        tracing::info!(
            filename = %filename,
            format = result.format.mime(),
            original_size = result.original_size,
            compressed_size = result.compressed_size,
            ratio = ?result.ratio,
            quality = result.requested_quality,
            "responded"
        );

        Ok(self.compression_service.create_response(filename, result))
    }

    fn build_upload(&self, form: UploadForm) -> Result<UploadRequest, CompressError> {
        let raw_bytes = form.file.ok_or(CompressError::MissingFile)?;
        self.validate_image_size(&raw_bytes)?;

        Ok(UploadRequest {
            raw_bytes,
            declared_mime: form.declared_mime,
            original_filename: form.filename,
            requested_quality: parse_quality(form.quality.as_deref()),
        })
    }

    async fn extract_upload_form(
        &self,
        content_type: &str,
        body: Body,
    ) -> Result<UploadForm, CompressError> {
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| CompressError::MalformedMultipart(e.to_string()))?;
        let constraints = Constraints::new()
            .size_limit(SizeLimit::new().whole_stream(self.max_upload_size as u64 + 64 * 1024));
        let mut multipart = multer::Multipart::with_constraints(body, boundary, constraints);

        let mut form = UploadForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| self.map_multipart_error(e))?
        {
            let name = field.name().map(str::to_string);
            let filename = field.file_name().map(str::to_string);
            match (name.as_deref(), filename) {
                // a plain `file` text field is not an upload
                (Some("file"), Some(filename)) if form.file.is_none() => {
                    form.filename = filename;
                    form.declared_mime = field
                        .content_type()
                        .map(|mime| mime.to_string())
                        .unwrap_or_default();
                    let bytes = field.bytes().await.map_err(|e| self.map_multipart_error(e))?;
                    form.file = Some(bytes);
                }
                (Some("quality"), _) => {
                    let text = field.text().await.map_err(|e| self.map_multipart_error(e))?;
                    form.quality = Some(text);
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn map_multipart_error(&self, err: multer::Error) -> CompressError {
        match err {
            multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
                CompressError::PayloadTooLarge {
                    limit: self.max_upload_size,
                }
            }
            other => CompressError::MalformedMultipart(other.to_string()),
        }
    }

    fn validate_image_size(&self, bytes: &[u8]) -> Result<(), CompressError> {
        if bytes.len() > self.max_upload_size {
            return Err(CompressError::PayloadTooLarge {
                limit: self.max_upload_size,
            });
        }
        Ok(())
    }

    fn json_response<T: Serialize>(
        &self,
        status: StatusCode,
        payload: &T,
        origin: Option<&str>,
    ) -> Response<Body> {
        match serde_json::to_vec(payload) {
            Ok(body) => self.create_cors_response(status, Body::from(body), origin),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response");
                self.create_cors_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Body::from(r#"{"error":"Compression failed"}"#),
                    origin,
                )
            }
        }
    }

    fn create_cors_response(
        &self,
        status: StatusCode,
        body: Body,
        origin: Option<&str>,
    ) -> Response<Body> {
        let allowed_origin = self.get_allowed_origin(origin);

        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&allowed_origin) {
            headers.insert("Access-Control-Allow-Origin", value);
        }
        headers.insert(
            "Access-Control-Allow-Methods",
            HeaderValue::from_static("POST, OPTIONS"),
        );
        headers.insert(
            "Access-Control-Allow-Headers",
            HeaderValue::from_static("Content-Type, Authorization"),
        );

        response
    }

    fn get_allowed_origin(&self, origin: Option<&str>) -> String {
        let allows_any = self.cors_config.allowed_origins.iter().any(|o| o == "*");

        match origin {
            _ if allows_any => "*".to_string(),
            Some(origin_value)
                if self
                    .cors_config
                    .allowed_origins
                    .iter()
                    .any(|o| o == origin_value) =>
            {
                origin_value.to_string()
            }
            _ => "null".to_string(),
        }
    }

    fn get_content_type(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    }

    fn is_multipart_content_type(&self, content_type: &str) -> bool {
        content_type.to_lowercase().starts_with("multipart/form-data")
    }
}
