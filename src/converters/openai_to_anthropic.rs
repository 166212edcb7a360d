use crate::{
    conversion_warnings::ConversionWarnings,
    error::GatewayError,
    image_utils,
    models::{
        anthropic::{
            ContentBlock, ImageSource, Message, MessageContent as AnthropicContent,
            MessagesRequest, Tool as AnthropicTool, ToolChoice as AnthropicToolChoice,
        },
        openai::{
            ChatCompletionRequest, ChatMessage, ContentPart, FunctionCallChoice, MessageContent,
            ResponseFormat, ToolChoice,
        },
    },
};

/// Anthropic requires max_tokens; requests without a cap get this default
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert an OpenAI-shaped request to an Anthropic MessagesRequest
pub async fn convert_request(
    openai_req: &ChatCompletionRequest,
) -> Result<(MessagesRequest, ConversionWarnings), GatewayError> {
    openai_req.validate()?;

    let mut warnings = ConversionWarnings::new();
    for (param, present) in [
        ("seed", openai_req.seed.is_some()),
        ("presence_penalty", openai_req.presence_penalty.is_some()),
        ("frequency_penalty", openai_req.frequency_penalty.is_some()),
    ] {
        if present {
            tracing::warn!(param = param, "Parameter not supported by Anthropic, ignoring");
            warnings.add_unsupported_param(param, "Anthropic");
        }
    }

    let mut system = extract_system_prompt(&openai_req.messages);
    if let Some(response_format) = &openai_req.response_format {
        if let Some(injected) = json_mode_instruction(response_format)? {
            system = Some(match system {
                Some(existing) => format!("{}\n\n{}", existing, injected),
                None => injected,
            });
            warnings.add_warning(
                "JSON response format implemented via system prompt injection for Anthropic"
                    .to_string(),
            );
        }
    }

    let mut messages = Vec::new();
    for message in openai_req.messages.iter().filter(|m| m.role != "system") {
        messages.push(convert_message(message)?);
    }

    // Anthropic caps temperature at 1.0
    let temperature = openai_req.temperature.map(|t| t.min(1.0));

    let tools = openai_req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.function.name.clone(),
                description: tool
                    .function
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Tool {}", tool.function.name)),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = match (&openai_req.tool_choice, &openai_req.function_call) {
        (Some(choice), _) => Some(convert_tool_choice(choice)?),
        (None, Some(FunctionCallChoice::Named { name })) => Some(AnthropicToolChoice {
            choice_type: "tool".to_string(),
            name: Some(name.clone()),
        }),
        _ => None,
    };

    let request = MessagesRequest {
        model: openai_req.model.clone(),
        system,
        messages,
        max_tokens: openai_req.output_token_cap().unwrap_or(DEFAULT_MAX_TOKENS),
        temperature,
        top_p: openai_req.top_p,
        stream: openai_req.stream,
        stop_sequences: openai_req.stop.as_ref().map(|s| s.to_vec()),
        tools,
        tool_choice,
    };

    Ok((request, warnings))
}

/// Concatenated text of every system message, in order
fn extract_system_prompt(messages: &[ChatMessage]) -> Option<String> {
    let prompts: Vec<String> = messages
        .iter()
        .filter(|m| m.role == "system")
        .filter_map(|m| m.content.as_ref().map(|c| c.extract_text()))
        .collect();

    if prompts.is_empty() {
        None
    } else {
        Some(prompts.join("\n\n"))
    }
}

fn json_mode_instruction(format: &ResponseFormat) -> Result<Option<String>, GatewayError> {
    match format {
        ResponseFormat::Text => Ok(None),
        ResponseFormat::JsonObject => Ok(Some(
            "Respond with a single valid JSON object and nothing else.".to_string(),
        )),
        ResponseFormat::JsonSchema { json_schema } => {
            let schema = json_schema.schema.as_ref().ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "json_schema response format requires a schema".to_string(),
                )
            })?;
            Ok(Some(format!(
                "Respond with a single valid JSON object matching this JSON schema and nothing else:\n{}",
                serde_json::to_string(schema)?
            )))
        }
    }
}

fn convert_message(message: &ChatMessage) -> Result<Message, GatewayError> {
    // tool results ride in a user turn on the Anthropic side
    if message.role == "tool" {
        let id = message.tool_call_id.clone().unwrap_or_default();
        let content = message
            .content
            .as_ref()
            .map(|c| c.extract_text())
            .unwrap_or_default();
        return Ok(Message {
            role: "user".to_string(),
            content: AnthropicContent::Blocks(vec![ContentBlock {
                block_type: "tool_result".to_string(),
                tool_use_id: Some(id),
                content: Some(serde_json::Value::String(content)),
                ..Default::default()
            }]),
        });
    }

    let mut blocks: Vec<ContentBlock> = Vec::new();

    match &message.content {
        Some(MessageContent::Text(text)) => blocks.push(ContentBlock::text(text.clone())),
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(ContentBlock::text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        let (media_type, data) = image_utils::parse_data_url(&image_url.url)?;
                        blocks.push(ContentBlock {
                            block_type: "image".to_string(),
                            source: Some(ImageSource {
                                source_type: "base64".to_string(),
                                media_type,
                                data,
                            }),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        None => {}
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            let input: serde_json::Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            blocks.push(ContentBlock {
                block_type: "tool_use".to_string(),
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                input: Some(input),
                ..Default::default()
            });
        }
    }

    if blocks.is_empty() {
        return Err(GatewayError::Conversion(format!(
            "{} message has no convertible content",
            message.role
        )));
    }

    // Single text block collapses back to the string form
    let content = if blocks.len() == 1 && blocks[0].block_type == "text" {
        AnthropicContent::Text(blocks.remove(0).text.unwrap_or_default())
    } else {
        AnthropicContent::Blocks(blocks)
    };

    Ok(Message {
        role: message.role.clone(),
        content,
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Result<AnthropicToolChoice, GatewayError> {
    match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" | "none" => Ok(AnthropicToolChoice {
                choice_type: "auto".to_string(),
                name: None,
            }),
            "required" | "any" => Ok(AnthropicToolChoice {
                choice_type: "any".to_string(),
                name: None,
            }),
            other => Err(GatewayError::InvalidRequest(format!(
                "unsupported tool_choice '{}'",
                other
            ))),
        },
        ToolChoice::Specific {
            choice_type,
            function,
        } => {
            if choice_type != "function" {
                return Err(GatewayError::InvalidRequest(format!(
                    "unsupported tool_choice type '{}'",
                    choice_type
                )));
            }
            Ok(AnthropicToolChoice {
                choice_type: "tool".to_string(),
                name: Some(function.name.clone()),
            })
        }
    }
}
