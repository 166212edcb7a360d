use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::GatewayError;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::{error_from_response, timed_get, Endpoint, Provider};
use crate::streaming::{spawn_openai_sse_stream, ChunkStream};

/// Adapter for OpenAI and OpenAI-compatible upstreams (Groq, OpenRouter,
/// HuggingFace). They differ only in base URL and provider tag; the wire
/// format is identical.
pub struct OpenAiEndpoint {
    client: Client,
    provider: Provider,
    region: String,
    base_url: String,
    api_key: String,
    upstream_model: Option<String>,
    timeout: Duration,
}

impl OpenAiEndpoint {
    pub fn new(provider: Provider, config: &EndpointConfig) -> Result<Self, GatewayError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        Ok(Self {
            client: Client::new(),
            provider,
            region: config.region.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            upstream_model: config.upstream_model.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    fn prepare(&self, request: &ChatCompletionRequest, stream: bool) -> ChatCompletionRequest {
        let mut upstream = request.clone();
        if let Some(model) = &self.upstream_model {
            upstream.model = model.clone();
        }
        upstream.stream = Some(stream);
        upstream
    }

    async fn post_chat(
        &self,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}

fn default_base_url(provider: Provider) -> &'static str {
    match provider {
        Provider::Groq => "https://api.groq.com/openai/v1",
        Provider::OpenRouter => "https://openrouter.ai/api/v1",
        Provider::HuggingFace => "https://router.huggingface.co/v1",
        _ => "https://api.openai.com/v1",
    }
}

#[async_trait]
impl Endpoint for OpenAiEndpoint {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let body = self.prepare(request, false);
        let response = self.post_chat(&body).await?;
        Ok(response.json::<ChatCompletionResponse>().await?)
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let body = self.prepare(request, true);
        let response = self.post_chat(&body).await?;
        Ok(spawn_openai_sse_stream(response))
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let url = format!("{}/models", self.base_url);
        timed_get(
            self.client
                .get(&url)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout),
        )
        .await
    }

    async fn embeddings(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        if self.provider != Provider::OpenAI {
            return Err(self.unsupported("embeddings"));
        }
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn generate_image(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        if self.provider != Provider::OpenAI {
            return Err(self.unsupported("image generation"));
        }
        let url = format!("{}/images/generations", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn moderate(
        &self,
        request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        if self.provider != Provider::OpenAI {
            return Err(self.unsupported("moderations"));
        }
        let url = format!("{}/moderations", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json().await?)
    }
}
