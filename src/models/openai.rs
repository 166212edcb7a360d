use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// OpenAI-shaped Chat Completion Request — the gateway's canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Candidate count; Gemini-family adapters accept only 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Stop sequences; the wire form (string or list) is preserved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Legacy function definitions; mutually exclusive with `tools`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Legacy counterpart of `tool_choice`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for ChatCompletionRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            max_tokens: None,
            max_completion_tokens: None,
            n: None,
            stop: None,
            response_format: None,
            tools: None,
            functions: None,
            tool_choice: None,
            function_call: None,
            stream: None,
            stream_options: None,
            user: None,
        }
    }
}

impl ChatCompletionRequest {
    /// Effective output-token cap (`max_completion_tokens` wins over the
    /// deprecated `max_tokens`)
    pub fn output_token_cap(&self) -> Option<u32> {
        self.max_completion_tokens.or(self.max_tokens)
    }

    /// Validate the cross-message invariants before any upstream call.
    ///
    /// - `tools` and `functions` are mutually exclusive
    /// - a `tool` message must carry a JSON object body and reference a
    ///   `tool_call.id` previously emitted by an assistant message
    /// - `function`-role messages must carry a JSON object body
    pub fn validate(&self) -> Result<(), GatewayError> {
        let has_tools = self.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false);
        let has_functions = self
            .functions
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if has_tools && has_functions {
            return Err(GatewayError::InvalidRequest(
                "functions and tools are mutually exclusive".to_string(),
            ));
        }

        let mut emitted_tool_calls: Vec<&str> = Vec::new();
        for message in &self.messages {
            if let Some(calls) = &message.tool_calls {
                emitted_tool_calls.extend(calls.iter().map(|c| c.id.as_str()));
            }

            match message.role.as_str() {
                "tool" => {
                    let id = message.tool_call_id.as_deref().ok_or_else(|| {
                        GatewayError::InvalidRequest(
                            "tool message is missing tool_call_id".to_string(),
                        )
                    })?;
                    if !emitted_tool_calls.contains(&id) {
                        return Err(GatewayError::InvalidRequest(format!(
                            "tool message references unknown tool_call_id '{}'",
                            id
                        )));
                    }
                    require_json_object_content(message, "tool")?;
                }
                "function" => {
                    require_json_object_content(message, "function")?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn require_json_object_content(message: &ChatMessage, role: &str) -> Result<(), GatewayError> {
    let text = message
        .content
        .as_ref()
        .map(|c| c.extract_text())
        .unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        _ => Err(GatewayError::InvalidRequest(format!(
            "{} message content must be a JSON object",
            role
        ))),
    }
}

/// Stop sequences: a single string or an ordered list on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequence {
    Single(String),
    Many(Vec<String>),
}

impl StopSequence {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequence::Single(s) => vec![s.clone()],
            StopSequence::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: system, user, assistant, tool, or function
    pub role: String,
    /// Message content; absent on assistant messages that only carry tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool invocations emitted by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Which tool invocation a `tool` message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Legacy single function call emitted by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role("user", text)
    }

    pub fn with_role(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(MessageContent::Text(text.into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            function_call: None,
            refusal: None,
        }
    }
}

/// Message content: a single string or an ordered sequence of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s),
            MessageContent::Parts(_) => None,
        }
    }

    /// Concatenated text of all text parts
    pub fn extract_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| {
                    if let ContentPart::Text { text } = part {
                        Some(text.as_str())
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One atomic piece of a multi-modal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// http(s):// or data: URL
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool type; only "function" is accepted
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the parameters; order-preserving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Tool choice: a literal ("none", "auto", "required") or a structured selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

/// Legacy function_call selector: "none"/"auto" or a named function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionCallChoice {
    Mode(String),
    Named { name: String },
}

/// Tool call in an assistant response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string
    pub arguments: String,
}

/// Response format selector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: JsonSchemaSpec },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Chat Completion Response (non-streaming)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    /// Always "chat.completion"
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// "open-gemini/<provider>/<region>/<model>" once finalized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    /// stop, length, content_filter, or tool_calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Streaming response chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    /// Always "chat.completion.chunk"
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    /// Only on the final chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub tool_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_sequence_round_trips_wire_form() {
        let single: ChatCompletionRequest =
            serde_json::from_str(r#"{"model":"m","messages":[],"stop":"END"}"#).unwrap();
        assert_eq!(single.stop, Some(StopSequence::Single("END".to_string())));
        let json = serde_json::to_string(&single).unwrap();
        assert!(json.contains(r#""stop":"END""#));

        let many: ChatCompletionRequest =
            serde_json::from_str(r#"{"model":"m","messages":[],"stop":["a","b"]}"#).unwrap();
        assert_eq!(
            many.stop,
            Some(StopSequence::Many(vec!["a".to_string(), "b".to_string()]))
        );
        let json = serde_json::to_string(&many).unwrap();
        assert!(json.contains(r#""stop":["a","b"]"#));
    }

    #[test]
    fn test_tool_choice_literal_and_structured() {
        let literal: ToolChoice = serde_json::from_str(r#""auto""#).unwrap();
        assert_eq!(literal, ToolChoice::Mode("auto".to_string()));

        let structured: ToolChoice =
            serde_json::from_str(r#"{"type":"function","function":{"name":"f"}}"#).unwrap();
        match structured {
            ToolChoice::Specific { function, .. } => assert_eq!(function.name, "f"),
            _ => panic!("expected structured tool choice"),
        }
    }

    #[test]
    fn test_message_content_string_and_parts() {
        let message: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"Hi"}"#).unwrap();
        assert_eq!(message.content.as_ref().unwrap().as_text(), Some("Hi"));

        let message: ChatMessage = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"Hi"},{"type":"image_url","image_url":{"url":"https://example.com/a.png"}}]}"#,
        )
        .unwrap();
        match message.content.unwrap() {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn test_validate_rejects_tools_and_functions_together() {
        let mut request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        request.tools = Some(vec![Tool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "f".to_string(),
                description: None,
                parameters: None,
            },
        }]);
        request.functions = Some(vec![FunctionDefinition {
            name: "g".to_string(),
            description: None,
            parameters: None,
        }]);

        let err = request.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("functions and tools are mutually exclusive"));
    }

    #[test]
    fn test_validate_rejects_unknown_tool_call_id() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::user("hi"),
                ChatMessage {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text(r#"{"temp":25}"#.to_string())),
                    tool_call_id: Some("t-missing".to_string()),
                    name: None,
                    tool_calls: None,
                    function_call: None,
                    refusal: None,
                },
            ],
            ..Default::default()
        };

        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("unknown tool_call_id"));
    }

    #[test]
    fn test_validate_rejects_non_object_tool_content() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "t1".to_string(),
                        tool_type: "function".to_string(),
                        function: FunctionCall {
                            name: "get_weather".to_string(),
                            arguments: r#"{"city":"Seoul"}"#.to_string(),
                        },
                    }]),
                    name: None,
                    tool_call_id: None,
                    function_call: None,
                    refusal: None,
                },
                ChatMessage {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text("25 degrees".to_string())),
                    tool_call_id: Some("t1".to_string()),
                    name: None,
                    tool_calls: None,
                    function_call: None,
                    refusal: None,
                },
            ],
            ..Default::default()
        };

        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_validate_accepts_tool_round_trip() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::user("What's the weather in Seoul?"),
                ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "t1".to_string(),
                        tool_type: "function".to_string(),
                        function: FunctionCall {
                            name: "get_weather".to_string(),
                            arguments: r#"{"city":"Seoul"}"#.to_string(),
                        },
                    }]),
                    name: None,
                    tool_call_id: None,
                    function_call: None,
                    refusal: None,
                },
                ChatMessage {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text(r#"{"temp":25}"#.to_string())),
                    tool_call_id: Some("t1".to_string()),
                    name: None,
                    tool_calls: None,
                    function_call: None,
                    refusal: None,
                },
            ],
            ..Default::default()
        };

        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_output_token_cap_prefers_max_completion_tokens() {
        let request = ChatCompletionRequest {
            max_tokens: Some(100),
            max_completion_tokens: Some(200),
            ..Default::default()
        };
        assert_eq!(request.output_token_cap(), Some(200));
    }

    #[test]
    fn test_deserialize_response() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 9, "total_tokens": 19}
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 19);
    }
}
