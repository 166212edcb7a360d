use crate::{
    error::GatewayError,
    models::{
        anthropic::{MessagesResponse, StreamEvent},
        openai::{
            ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatMessage, ChunkChoice,
            Delta, FunctionCall, MessageContent, ToolCall, Usage,
        },
    },
};

/// Convert an Anthropic MessagesResponse to an OpenAI-shaped response
pub fn convert_response(
    anthropic_resp: &MessagesResponse,
) -> Result<ChatCompletionResponse, GatewayError> {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &anthropic_resp.content {
        match block.block_type.as_str() {
            "text" => {
                if let Some(block_text) = &block.text {
                    text.push_str(block_text);
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    id: block.id.clone().unwrap_or_default(),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: block.name.clone().unwrap_or_default(),
                        arguments: block
                            .input
                            .as_ref()
                            .map(|input| {
                                serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                            })
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return Err(GatewayError::Conversion(
            "message must have content or tool calls".to_string(),
        ));
    }

    Ok(ChatCompletionResponse {
        id: anthropic_resp.id.clone(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: anthropic_resp.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(text))
                },
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
                function_call: None,
                refusal: None,
            },
            finish_reason: anthropic_resp.stop_reason.as_deref().map(map_stop_reason),
        }],
        usage: Some(Usage {
            prompt_tokens: anthropic_resp.usage.input_tokens,
            completion_tokens: anthropic_resp.usage.output_tokens,
            total_tokens: anthropic_resp.usage.input_tokens + anthropic_resp.usage.output_tokens,
        }),
        system_fingerprint: None,
    })
}

/// Map an Anthropic stop reason onto the OpenAI vocabulary
pub fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        _ => "content_filter".to_string(),
    }
}

/// Convert one Anthropic SSE event to an OpenAI chunk.
///
/// Returns None for events with no OpenAI counterpart (pings,
/// content_block_start, message_stop — the [DONE] frame is the stream
/// bridge's concern).
pub fn convert_stream_event(
    event: &StreamEvent,
    request_id: &str,
    model: &str,
) -> Option<ChatCompletionChunk> {
    let chunk = |delta: Delta, finish_reason: Option<String>, usage: Option<Usage>| {
        ChatCompletionChunk {
            id: request_id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    };

    match event.event_type.as_str() {
        "message_start" => Some(chunk(
            Delta {
                role: Some("assistant".to_string()),
                content: None,
                tool_calls: None,
            },
            None,
            None,
        )),
        "content_block_delta" => {
            let text = event.delta.as_ref()?.text.clone()?;
            Some(chunk(
                Delta {
                    role: None,
                    content: Some(text),
                    tool_calls: None,
                },
                None,
                None,
            ))
        }
        "message_delta" => {
            let finish_reason = event
                .delta
                .as_ref()
                .and_then(|d| d.stop_reason.as_deref())
                .map(map_stop_reason);
            let usage = event.usage.as_ref().map(|u| Usage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            });
            Some(chunk(Delta::default(), finish_reason, usage))
        }
        _ => None,
    }
}
