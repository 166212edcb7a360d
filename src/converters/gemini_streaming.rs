use crate::{
    converters::gemini_response::map_finish_reason,
    error::GatewayError,
    models::{
        gemini::{GenerateContentResponse, Part},
        openai::{
            ChatCompletionChunk, ChunkChoice, Delta, FunctionCallDelta, ToolCallDelta, Usage,
        },
    },
};

/// Convert one Gemini stream chunk into an OpenAI chat.completion.chunk.
///
/// Gemini sends a full response structure per chunk; the first converted
/// chunk carries the role, later ones carry content/tool-call deltas, and
/// the chunk bearing a finish reason also carries usage.
pub fn convert_streaming_chunk(
    gemini_chunk: &GenerateContentResponse,
    request_id: &str,
    model: &str,
    is_first_chunk: &mut bool,
) -> Result<Option<ChatCompletionChunk>, GatewayError> {
    let candidate = match gemini_chunk.candidates.first() {
        Some(candidate) => candidate,
        None => return Ok(None), // keep-alive chunk, skip
    };

    let mut content = String::new();
    let mut tool_calls: Vec<ToolCallDelta> = Vec::new();
    if let Some(candidate_content) = &candidate.content {
        for part in &candidate_content.parts {
            match part {
                Part::Text { text } => content.push_str(text),
                Part::FunctionCall { function_call } => {
                    tool_calls.push(ToolCallDelta {
                        index: tool_calls.len() as u32,
                        id: Some(format!(
                            "tool-{}-0-{}",
                            function_call.name,
                            tool_calls.len()
                        )),
                        tool_type: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: Some(function_call.name.clone()),
                            arguments: Some(
                                serde_json::to_string(&function_call.args)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            ),
                        }),
                    });
                }
                _ => {}
            }
        }
    }

    let role = if *is_first_chunk {
        *is_first_chunk = false;
        Some("assistant".to_string())
    } else {
        None
    };

    let finish_reason = candidate
        .finish_reason
        .as_deref()
        .map(map_finish_reason);

    // Usage rides on the terminating chunk only
    let usage = if finish_reason.is_some() {
        gemini_chunk.usage_metadata.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
    } else {
        None
    };

    Ok(Some(ChatCompletionChunk {
        id: request_id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: gemini_chunk
            .model_version
            .clone()
            .unwrap_or_else(|| model.to_string()),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role,
                content: if content.is_empty() {
                    None
                } else {
                    Some(content)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
        }],
        usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gemini::{Candidate, Content, UsageMetadata};

    fn chunk_with_text(text: &str, finish: Option<&str>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: "model".to_string(),
                    parts: vec![Part::text(text)],
                }),
                finish_reason: finish.map(|f| f.to_string()),
                safety_ratings: None,
            }],
            usage_metadata: None,
            model_version: Some("gemini-2.0-flash".to_string()),
        }
    }

    #[test]
    fn test_first_chunk_carries_role() {
        let mut is_first = true;
        let chunk = convert_streaming_chunk(
            &chunk_with_text("Hello", None),
            "chatcmpl-x",
            "gemini-2.0-flash",
            &mut is_first,
        )
        .unwrap()
        .unwrap();

        assert_eq!(chunk.choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(!is_first);
    }

    #[test]
    fn test_middle_chunk_carries_content_only() {
        let mut is_first = false;
        let chunk = convert_streaming_chunk(
            &chunk_with_text(" world", None),
            "chatcmpl-x",
            "gemini-2.0-flash",
            &mut is_first,
        )
        .unwrap()
        .unwrap();

        assert!(chunk.choices[0].delta.role.is_none());
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some(" world"));
        assert!(chunk.choices[0].finish_reason.is_none());
    }

    #[test]
    fn test_final_chunk_carries_finish_and_usage() {
        let mut response = chunk_with_text("", Some("STOP"));
        response.usage_metadata = Some(UsageMetadata {
            prompt_token_count: 10,
            candidates_token_count: 20,
            total_token_count: 30,
        });

        let mut is_first = false;
        let chunk = convert_streaming_chunk(
            &response,
            "chatcmpl-x",
            "gemini-2.0-flash",
            &mut is_first,
        )
        .unwrap()
        .unwrap();

        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunk.usage.as_ref().unwrap().total_tokens, 30);
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let response = GenerateContentResponse {
            candidates: vec![],
            usage_metadata: None,
            model_version: None,
        };

        let mut is_first = false;
        let result = convert_streaming_chunk(
            &response,
            "chatcmpl-x",
            "gemini-2.0-flash",
            &mut is_first,
        )
        .unwrap();
        assert!(result.is_none());
    }
}
