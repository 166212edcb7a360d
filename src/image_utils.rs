use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::time::Duration;

use crate::error::GatewayError;

const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024; // Gemini inline-blob limit

/// Pluggable downloader for image-URL message parts.
///
/// The Gemini converter accepts an optional fetcher; without one, remote
/// image parts degrade to a text placeholder instead of an inline blob.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Returns `(mime_type, base64_data)` for the given URL
    async fn fetch(&self, url: &str) -> Result<(String, String), GatewayError>;
}

/// Fetcher backed by a plain HTTP client
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(GatewayError::HttpRequest)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(String, String), GatewayError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(GatewayError::Conversion(
                "Only HTTP(S) URLs are supported for image fetching".to_string(),
            ));
        }

        tracing::debug!(url = url, "Fetching image");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(GatewayError::HttpRequest)?;

        if !response.status().is_success() {
            return Err(GatewayError::Conversion(format!(
                "Image fetch failed with status: {}",
                response.status()
            )));
        }

        let mime_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();

        if !mime_type.to_lowercase().starts_with("image/") {
            return Err(GatewayError::Conversion(format!(
                "URL does not point to an image (content-type: {})",
                mime_type
            )));
        }

        // Reject by Content-Length before pulling the body when possible
        if let Some(length) = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if length > MAX_IMAGE_BYTES {
                return Err(GatewayError::Conversion(format!(
                    "Image too large: {} bytes (max: {} bytes)",
                    length, MAX_IMAGE_BYTES
                )));
            }
        }

        let bytes = response.bytes().await.map_err(GatewayError::HttpRequest)?;
        validate_image(&bytes, &mime_type)?;

        Ok((mime_type, general_purpose::STANDARD.encode(&bytes)))
    }
}

/// Parse a `data:image/<fmt>;base64,<data>` URL into `(mime_type, base64_data)`
pub fn parse_data_url(data_url: &str) -> Result<(String, String), GatewayError> {
    let url_body = data_url.strip_prefix("data:").ok_or_else(|| {
        GatewayError::Conversion("Invalid data URL: must start with 'data:'".to_string())
    })?;

    let (header, data) = url_body.split_once(',').ok_or_else(|| {
        GatewayError::Conversion("Invalid data URL format: missing comma separator".to_string())
    })?;

    let mime_type = header.split(';').next().unwrap_or("").to_string();

    if !header.split(';').any(|part| part == "base64") {
        return Err(GatewayError::Conversion(
            "Only base64-encoded data URLs are supported".to_string(),
        ));
    }

    let decoded = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| GatewayError::Conversion(format!("Invalid base64 data: {}", e)))?;

    validate_image(&decoded, &mime_type)?;

    Ok((mime_type, data.to_string()))
}

/// Validate image format and size against the inline-blob limits
pub fn validate_image(data: &[u8], mime_type: &str) -> Result<(), GatewayError> {
    if data.len() > MAX_IMAGE_BYTES {
        return Err(GatewayError::Conversion(format!(
            "Image too large: {} bytes (max: {} bytes)",
            data.len(),
            MAX_IMAGE_BYTES
        )));
    }

    let supported = ["image/jpeg", "image/png", "image/gif", "image/webp"];
    let mime_base = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .to_lowercase();

    if !supported.contains(&mime_base.as_str()) {
        return Err(GatewayError::Conversion(format!(
            "Unsupported image format: {} (supported: jpeg, png, gif, webp)",
            mime_base
        )));
    }

    Ok(())
}
