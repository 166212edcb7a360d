use async_trait::async_trait;
use std::time::Duration;

use crate::error::{classify_upstream, GatewayError};
use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};
use crate::streaming::ChunkStream;

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod cohere;
pub mod gemini;
pub mod openai;

/// Upstream providers the gateway can route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    Azure,
    Anthropic,
    /// Google AI Studio Gemini
    Studio,
    /// Google Vertex Gemini
    Vertex,
    Bedrock,
    Cohere,
    Groq,
    OpenRouter,
    HuggingFace,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Azure => "azure",
            Provider::Anthropic => "anthropic",
            Provider::Studio => "studio",
            Provider::Vertex => "vertex",
            Provider::Bedrock => "bedrock",
            Provider::Cohere => "cohere",
            Provider::Groq => "groq",
            Provider::OpenRouter => "openrouter",
            Provider::HuggingFace => "huggingface",
        }
    }

    /// Whether requests are reshaped into the Gemini content model
    pub fn is_gemini_family(&self) -> bool {
        matches!(self, Provider::Studio | Provider::Vertex)
    }
}

impl std::str::FromStr for Provider {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "azure" => Ok(Provider::Azure),
            "anthropic" => Ok(Provider::Anthropic),
            "studio" => Ok(Provider::Studio),
            "vertex" => Ok(Provider::Vertex),
            "bedrock" => Ok(Provider::Bedrock),
            "cohere" => Ok(Provider::Cohere),
            "groq" => Ok(Provider::Groq),
            "openrouter" => Ok(Provider::OpenRouter),
            "huggingface" => Ok(Provider::HuggingFace),
            _ => Err(GatewayError::Config(format!("Invalid provider: {}", s))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Contract every provider adapter implements.
///
/// The extension operations default to an unsupported-capability error so
/// thin adapters only implement what their upstream actually offers.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn provider(&self) -> Provider;

    fn region(&self) -> &str;

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError>;

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError>;

    /// One shallow upstream call; returns observed latency
    async fn ping(&self) -> Result<Duration, GatewayError>;

    async fn shutdown(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn embeddings(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("embeddings"))
    }

    async fn generate_image(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("image generation"))
    }

    async fn transcribe_audio(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("audio transcription"))
    }

    async fn translate_audio(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("audio translation"))
    }

    async fn synthesize_speech(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("speech synthesis"))
    }

    async fn moderate(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("moderations"))
    }

    async fn create_fine_tuning_job(
        &self,
        _request: &serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        Err(self.unsupported("fine-tuning"))
    }

    fn unsupported(&self, capability: &str) -> GatewayError {
        GatewayError::UnsupportedCapability {
            provider: self.provider().to_string(),
            capability: capability.to_string(),
        }
    }
}

/// Turn a non-success upstream response into the gateway error taxonomy
pub(crate) async fn error_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    classify_upstream(status, &body)
}

/// Measure one GET round-trip for health pinging
pub(crate) async fn timed_get(
    builder: reqwest::RequestBuilder,
) -> Result<Duration, GatewayError> {
    let started = std::time::Instant::now();
    let response = builder.send().await?;
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(started.elapsed())
}
