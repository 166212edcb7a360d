use crate::{
    error::GatewayError,
    models::{
        gemini::{Candidate, GenerateContentResponse, Part},
        openai::{
            ChatChoice, ChatCompletionResponse, ChatMessage, ContentPart, FunctionCall,
            MessageContent, ToolCall, Usage,
        },
    },
};

/// Convert a Gemini GenerateContentResponse to an OpenAI-shaped response.
///
/// `id`, `created`, and `system_fingerprint` are placeholders here; the
/// router stamps the final values.
pub fn convert_response(
    gemini_resp: &GenerateContentResponse,
    model: &str,
) -> Result<ChatCompletionResponse, GatewayError> {
    if gemini_resp.candidates.is_empty() {
        return Err(GatewayError::Conversion(
            "No candidates in Gemini response".to_string(),
        ));
    }

    let choices = gemini_resp
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| convert_candidate(candidate, index))
        .collect::<Result<Vec<_>, _>>()?;

    let usage = gemini_resp.usage_metadata.as_ref().map(|u| Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: gemini_resp
            .model_version
            .clone()
            .unwrap_or_else(|| model.to_string()),
        choices,
        usage,
        system_fingerprint: None,
    })
}

fn convert_candidate(candidate: &Candidate, index: usize) -> Result<ChatChoice, GatewayError> {
    let content = candidate.content.as_ref().ok_or_else(|| {
        GatewayError::Conversion(format!("candidate {} does not have content", index))
    })?;

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for (part_index, part) in content.parts.iter().enumerate() {
        match part {
            Part::Text { text } => text_parts.push(text.clone()),
            Part::FunctionCall { function_call } => {
                tool_calls.push(ToolCall {
                    id: format!("tool-{}-{}-{}", function_call.name, index, part_index),
                    tool_type: "function".to_string(),
                    function: FunctionCall {
                        name: function_call.name.clone(),
                        arguments: serde_json::to_string(&function_call.args)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            // Inline blobs and function responses do not occur in model output
            _ => {}
        }
    }

    let message_content = match text_parts.len() {
        0 => None,
        1 => Some(MessageContent::Text(text_parts.remove(0))),
        _ => Some(MessageContent::Parts(
            text_parts
                .into_iter()
                .map(|text| ContentPart::Text { text })
                .collect(),
        )),
    };

    if message_content.is_none() && tool_calls.is_empty() {
        return Err(GatewayError::Conversion(
            "message must have content or tool calls".to_string(),
        ));
    }

    Ok(ChatChoice {
        index: index as u32,
        message: ChatMessage {
            role: "assistant".to_string(),
            content: message_content,
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
        finish_reason: candidate.finish_reason.as_deref().map(map_finish_reason),
    })
}

/// Map a Gemini finish reason onto the OpenAI vocabulary
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        _ => "content_filter".to_string(),
    }
}
