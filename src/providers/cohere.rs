use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EndpointConfig;
use crate::error::GatewayError;
use crate::models::openai::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, MessageContent, Usage,
};
use crate::providers::{error_from_response, timed_get, Endpoint, Provider};
use crate::streaming::{emulate_stream, ChunkStream};

const DEFAULT_BASE_URL: &str = "https://api.cohere.com/v1";

/// Cohere chat adapter.
///
/// Cohere splits the conversation into a `message` (the last user turn)
/// and `chat_history` with USER/CHATBOT roles; system messages become the
/// preamble.
pub struct CohereEndpoint {
    client: Client,
    region: String,
    base_url: String,
    api_key: String,
    upstream_model: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CohereChatRequest {
    model: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    chat_history: Vec<CohereChatTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CohereChatTurn {
    role: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CohereChatResponse {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereMeta {
    #[serde(default)]
    tokens: Option<CohereTokens>,
}

#[derive(Debug, Deserialize)]
struct CohereTokens {
    #[serde(default)]
    input_tokens: Option<f64>,
    #[serde(default)]
    output_tokens: Option<f64>,
}

impl CohereEndpoint {
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

    fn build_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<CohereChatRequest, GatewayError> {
        let preamble = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .filter_map(|m| m.content.as_ref().map(|c| c.extract_text()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut turns: Vec<CohereChatTurn> = request
            .messages
            .iter()
            .filter(|m| m.role == "user" || m.role == "assistant")
            .map(|m| CohereChatTurn {
                role: map_role(&m.role),
                message: m
                    .content
                    .as_ref()
                    .map(|c| c.extract_text())
                    .unwrap_or_default(),
            })
            .collect();

        // The last user turn is the message; everything before is history
        let message = match turns.pop() {
            Some(turn) if turn.role == "USER" => turn.message,
            Some(turn) => {
                turns.push(turn);
                return Err(GatewayError::InvalidRequest(
                    "Cohere requires the conversation to end with a user message".to_string(),
                ));
            }
            None => {
                return Err(GatewayError::InvalidRequest(
                    "Cohere requires at least one user message".to_string(),
                ))
            }
        };

        Ok(CohereChatRequest {
            model: self
                .upstream_model
                .clone()
                .unwrap_or_else(|| request.model.clone()),
            message,
            chat_history: turns,
            preamble: if preamble.is_empty() {
                None
            } else {
                Some(preamble)
            },
            temperature: request.temperature,
            p: request.top_p,
            max_tokens: request.output_token_cap(),
            stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
        })
    }
}

fn map_role(role: &str) -> String {
    match role {
        "assistant" => "CHATBOT".to_string(),
        _ => "USER".to_string(),
    }
}

fn map_finish_reason(reason: Option<&str>) -> String {
    match reason {
        Some("MAX_TOKENS") => "length".to_string(),
        Some("COMPLETE") | Some("STOP_SEQUENCE") | None => "stop".to_string(),
        _ => "content_filter".to_string(),
    }
}

#[async_trait]
impl Endpoint for CohereEndpoint {
    fn provider(&self) -> Provider {
        Provider::Cohere
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn generate_chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        request.validate()?;
        let body = self.build_request(request)?;

        let url = format!("{}/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let cohere_response: CohereChatResponse = response.json().await?;

        let usage = cohere_response
            .meta
            .as_ref()
            .and_then(|m| m.tokens.as_ref())
            .map(|t| {
                let prompt_tokens = t.input_tokens.unwrap_or(0.0) as u64;
                let completion_tokens = t.output_tokens.unwrap_or(0.0) as u64;
                Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            });

        Ok(ChatCompletionResponse {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: body.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some(MessageContent::Text(cohere_response.text)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: None,
                    function_call: None,
                    refusal: None,
                },
                finish_reason: Some(map_finish_reason(
                    cohere_response.finish_reason.as_deref(),
                )),
            }],
            usage,
            system_fingerprint: None,
        })
    }

    async fn generate_chat_completion_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream, GatewayError> {
        // Cohere's stream framing is not SSE-compatible; synthesize instead
        let response = self.generate_chat_completion(request).await?;
        Ok(emulate_stream(response))
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> CohereEndpoint {
        CohereEndpoint::new(&EndpointConfig {
            provider: "cohere".to_string(),
            region: "default".to_string(),
            model: "command-r".to_string(),
            aliases: vec![],
            upstream_model: None,
            api_key: "co-key".to_string(),
            base_url: None,
            timeout_seconds: 30,
            priority: 1,
            extra: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_history_and_message_split() {
        let request = ChatCompletionRequest {
            model: "command-r".to_string(),
            messages: vec![
                ChatMessage::with_role("system", "Be terse."),
                ChatMessage::user("Hi"),
                ChatMessage::with_role("assistant", "Hello"),
                ChatMessage::user("How are you?"),
            ],
            ..Default::default()
        };

        let body = endpoint().build_request(&request).unwrap();
        assert_eq!(body.message, "How are you?");
        assert_eq!(body.chat_history.len(), 2);
        assert_eq!(body.chat_history[0].role, "USER");
        assert_eq!(body.chat_history[1].role, "CHATBOT");
        assert_eq!(body.preamble.as_deref(), Some("Be terse."));
    }

    #[test]
    fn test_conversation_must_end_with_user() {
        let request = ChatCompletionRequest {
            model: "command-r".to_string(),
            messages: vec![
                ChatMessage::user("Hi"),
                ChatMessage::with_role("assistant", "Hello"),
            ],
            ..Default::default()
        };

        assert!(endpoint().build_request(&request).is_err());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("COMPLETE")), "stop");
        assert_eq!(map_finish_reason(Some("MAX_TOKENS")), "length");
        assert_eq!(map_finish_reason(Some("ERROR_TOXIC")), "content_filter");
    }
}
