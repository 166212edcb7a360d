use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::converters::{gemini_response, openai_to_gemini};
use crate::error::GatewayError;
use crate::image_utils::ImageFetcher;
use crate::models::gemini::GenerateContentResponse;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::{error_from_response, timed_get, Endpoint, Provider};
use crate::streaming::{spawn_gemini_sse_stream, ChunkStream};

const STUDIO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini adapter covering both Google AI Studio and Vertex AI.
///
/// Studio authenticates with a `key` query parameter; Vertex with a bearer
/// token against a regional host and a project-scoped path.
pub struct GeminiEndpoint {
    client: Client,
    provider: Provider,
    region: String,
    base_url: String,
    api_key: String,
    project: Option<String>,
    upstream_model: Option<String>,
    image_fetcher: Option<Arc<dyn ImageFetcher>>,
    timeout: Duration,
}

impl GeminiEndpoint {
    pub fn studio(config: &EndpointConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            client: Client::new(),
            provider: Provider::Studio,
            region: config.region.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| STUDIO_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
            project: None,
            upstream_model: config.upstream_model.clone(),
            image_fetcher: None,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    pub fn vertex(config: &EndpointConfig) -> Result<Self, GatewayError> {
        let project = config.extra.get("project").cloned().ok_or_else(|| {
            GatewayError::Config("Vertex endpoints require extra.project".to_string())
        })?;
        let base_url = config.base_url.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com/v1", config.region)
        });

        Ok(Self {
            client: Client::new(),
            provider: Provider::Vertex,
            region: config.region.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            project: Some(project),
            upstream_model: config.upstream_model.clone(),
            image_fetcher: None,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    /// Wire the downloader used to inline image-URL parts
    pub fn with_image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.image_fetcher = Some(fetcher);
        self
    }

    fn upstream_model(&self, requested: &str) -> String {
        self.upstream_model
            .clone()
            .unwrap_or_else(|| requested.to_string())
    }

    fn action_url(&self, model: &str, action: &str) -> String {
        match &self.project {
            // Vertex path is project- and region-scoped
            Some(project) => format!(
                "{}/projects/{}/locations/{}/publishers/google/models/{}:{}",
                self.base_url, project, self.region, model, action
            ),
            None => format!("{}/models/{}:{}", self.base_url, model, action),
        }
    }

    async fn post_generate(
        &self,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let (body, _warnings) = openai_to_gemini::convert_request(
            request,
            self.image_fetcher.as_deref(),
        )
        .await?;

        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let model = self.upstream_model(&request.model);
        let url = self.action_url(&model, action);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout);

        builder = match self.provider {
            Provider::Vertex => builder.bearer_auth(&self.api_key),
            _ => builder.query(&[("key", &self.api_key)]),
        };
        if stream {
            builder = builder.query(&[("alt", "sse")]);
        }

        let response = builder.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Endpoint for GeminiEndpoint {
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
        let model = self.upstream_model(&request.model);
        let response = self.post_generate(request, false).await?;
        let gemini_response = response.json::<GenerateContentResponse>().await?;
        gemini_response::convert_response(&gemini_response, &model)
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        let model = self.upstream_model(&request.model);
        let response = self.post_generate(request, true).await?;
        let request_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        Ok(spawn_gemini_sse_stream(response, request_id, model))
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let builder = match &self.project {
            Some(project) => self
                .client
                .get(format!(
                    "{}/projects/{}/locations/{}/publishers/google/models",
                    self.base_url, project, self.region
                ))
                .bearer_auth(&self.api_key),
            None => self
                .client
                .get(format!("{}/models", self.base_url))
                .query(&[("key", &self.api_key)]),
        };
        timed_get(builder.timeout(self.timeout)).await
    }
}
