use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::GatewayError;
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::providers::{timed_get, Endpoint, Provider};
use crate::streaming::{emulate_stream, ChunkStream};

pub mod client;
pub mod coordinator;

pub use client::BatchApiClient;
pub use coordinator::{job_id, BatchConfig, BatchCoordinator};

/// Model-name suffix that routes a request through the deferred-batch path
pub const BATCH_MODEL_SUFFIX: &str = "@batch";

/// Strip the `@batch` suffix, returning the bare model name if present
pub fn strip_batch_suffix(model: &str) -> Option<&str> {
    model.strip_suffix(BATCH_MODEL_SUFFIX)
}

/// OpenAI adapter for deferred execution: requests coalesce into upstream
/// batch jobs instead of immediate chat-completion calls.
pub struct OpenAiBatchEndpoint {
    coordinator: BatchCoordinator,
    client: Arc<BatchApiClient>,
    region: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAiBatchEndpoint {
    pub fn new(config: &EndpointConfig, batch_config: BatchConfig) -> Result<Self, GatewayError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = Arc::new(BatchApiClient::new(
            base_url,
            config.api_key.clone(),
            timeout,
        ));

        Ok(Self {
            coordinator: BatchCoordinator::new(Arc::clone(&client), batch_config),
            client,
            region: config.region.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl Endpoint for OpenAiBatchEndpoint {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        request.validate()?;

        let mut upstream = request.clone();
        if let Some(model) = strip_batch_suffix(&upstream.model) {
            upstream.model = model.to_string();
        }

        let receiver = self.coordinator.enqueue(upstream).await?;
        match receiver.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(GatewayError::TransientUpstream {
                status: None,
                message,
            }),
            // Coordinator went away without an answer
            Err(_) => Err(GatewayError::Cancelled),
        }
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        // Deferred results arrive whole; emulate the stream contract
        let response = self.generate_chat_completion(request).await?;
        Ok(emulate_stream(response))
    }

    async fn ping(&self) -> Result<Duration, GatewayError> {
        let url = format!("{}/models", self.client.base_url());
        timed_get(
            reqwest::Client::new()
                .get(&url)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout),
        )
        .await
    }

    async fn shutdown(&self) -> Result<(), GatewayError> {
        self.coordinator.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_batch_suffix() {
        assert_eq!(strip_batch_suffix("gpt-4o@batch"), Some("gpt-4o"));
        assert_eq!(strip_batch_suffix("gpt-4o"), None);
        assert_eq!(strip_batch_suffix("@batch"), Some(""));
    }
}
