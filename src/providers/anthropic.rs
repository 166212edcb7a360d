use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::converters::{anthropic_response, openai_to_anthropic};
use crate::error::GatewayError;
use crate::models::anthropic::MessagesResponse;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::{error_from_response, timed_get, Endpoint, Provider};
use crate::streaming::{spawn_anthropic_sse_stream, ChunkStream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Claude adapter (messages API)
pub struct AnthropicEndpoint {
    client: Client,
    region: String,
    base_url: String,
    api_key: String,
    upstream_model: Option<String>,
    timeout: Duration,
}

impl AnthropicEndpoint {
    pub fn new(config: &EndpointConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: Client::new(),
            region: config.region.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            upstream_model: config.upstream_model.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    fn upstream_model(&self, requested: &str) -> String {
        self.upstream_model
            .clone()
            .unwrap_or_else(|| canonicalize_model(requested))
    }

    async fn post_messages(
        &self,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let (mut body, _warnings) = openai_to_anthropic::convert_request(request).await?;
        body.model = self.upstream_model(&request.model);
        body.stream = Some(stream);

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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

/// Canonicalize short Claude model names to their dated releases
pub fn canonicalize_model(model: &str) -> String {
    match model {
        "claude-3-opus" => "claude-3-opus@20240229".to_string(),
        "claude-3-sonnet" => "claude-3-sonnet@20240229".to_string(),
        "claude-3-haiku" => "claude-3-haiku@20240307".to_string(),
        "claude-3-5-sonnet" => "claude-3-5-sonnet@20240620".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Endpoint for AnthropicEndpoint {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let response = self.post_messages(request, false).await?;
        let messages_response = response.json::<MessagesResponse>().await?;
        anthropic_response::convert_response(&messages_response)
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let response = self.post_messages(request, true).await?;
        let request_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        Ok(spawn_anthropic_sse_stream(
            response,
            request_id,
            self.upstream_model(&request.model),
        ))
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let url = format!("{}/models", self.base_url);
        timed_get(
            self.client
                .get(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .timeout(self.timeout),
        )
        .await
    }
}
