use bytes::Bytes;
use serde::Serialize;

use crate::profile::DetectedFormat;

/// One uploaded file as handed over by the request-ingestion layer.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub raw_bytes: Bytes,
    pub declared_mime: String,
    pub original_filename: String,
    pub requested_quality: u8, // already clamped into 10-100
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub compressed_bytes: Vec<u8>,
    pub format: DetectedFormat,
    pub mime: String, // declared by the client, detected MIME when absent
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: Option<f64>,
    pub requested_quality: u8,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompressResponse {
    pub filename: String,
    pub mime: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: Option<f64>,
    pub requested_quality: u8,
    pub original_size_human: String,
    pub compressed_size_human: String,
    pub data_url: String,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
