use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::GatewayError;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::{error_from_response, timed_get, Endpoint, Provider};
use crate::streaming::{spawn_openai_sse_stream, ChunkStream};

const DEFAULT_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI adapter.
///
/// Same wire format as OpenAI, but requests route through
/// `/openai/deployments/<deployment>/chat/completions?api-version=<v>` and
/// authenticate with the `api-key` header instead of a bearer token.
pub struct AzureEndpoint {
    client: Client,
    region: String,
    base_url: String,
    deployment: String,
    api_version: String,
    api_key: String,
    timeout: Duration,
}

impl AzureEndpoint {
    pub fn new(config: &EndpointConfig) -> Result<Self, GatewayError> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            GatewayError::Config(
                "Azure endpoints require base_url (the resource endpoint)".to_string(),
            )
        })?;
        let deployment = config
            .extra
            .get("deployment")
            .cloned()
            .unwrap_or_else(|| config.upstream_model.clone().unwrap_or_else(|| config.model.clone()));
        let api_version = config
            .extra
            .get("api_version")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(Self {
            client: Client::new(),
            region: config.region.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            deployment,
            api_version,
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, self.deployment, self.api_version
        )
    }

    async fn post_chat(
        &self,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut body = request.clone();
        body.stream = Some(stream);

        let response = self
            .client
            .post(self.chat_url())
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Endpoint for AzureEndpoint {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let response = self.post_chat(request, false).await?;
        Ok(response.json::<ChatCompletionResponse>().await?)
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let response = self.post_chat(request, true).await?;
        Ok(spawn_openai_sse_stream(response))
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let url = format!(
            "{}/openai/models?api-version={}",
            self.base_url, self.api_version
        );
        timed_get(
            self.client
                .get(&url)
                .header("api-key", &self.api_key)
                .timeout(self.timeout),
        )
        .await
    }
}
