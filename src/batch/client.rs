use reqwest::Client;
use std::time::Duration;

use crate::error::GatewayError;
use crate::models::batch::{BatchObject, FileObject};
use crate::providers::error_from_response;

/// Thin client for the OpenAI files and batches APIs
pub struct BatchApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl BatchApiClient {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload a JSONL blob with purpose "batch"
    pub async fn upload_batch_file(&self, jsonl: Vec<u8>) -> Result<FileObject, GatewayError> {
        let part = reqwest::multipart::Part::bytes(jsonl)
            .file_name("batch.jsonl")
            .mime_str("application/jsonl")
            .map_err(GatewayError::HttpRequest)?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "batch")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Create a batch over an uploaded input file
    pub async fn create_batch(&self, input_file_id: &str) -> Result<BatchObject, GatewayError> {
        let body = serde_json::json!({
            "input_file_id": input_file_id,
            "endpoint": "/v1/chat/completions",
            "completion_window": "24h",
        });

        let response = self
            .client
            .post(format!("{}/batches", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<BatchObject, GatewayError> {
        let response = self
            .client
            .get(format!("{}/batches/{}", self.base_url, batch_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    /// Download a file's raw content (the batch output JSONL)
    pub async fn download_file(&self, file_id: &str) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(format!("{}/files/{}/content", self.base_url, file_id))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.text().await?)
    }
}
