use std::collections::HashMap;

use crate::{
    conversion_warnings::ConversionWarnings,
    converters::schema,
    error::GatewayError,
    image_utils::{self, ImageFetcher},
    models::{
        gemini::{
            Content, FunctionCall as GeminiFunctionCall, FunctionCallingConfig,
            FunctionDeclaration, FunctionResponse, GenerateContentRequest, GenerationConfig,
            InlineData, Part, SystemInstruction, Tool as GeminiTool, ToolConfig,
            permissive_safety_settings,
        },
        openai::{
            ChatCompletionRequest, ChatMessage, ContentPart, FunctionCallChoice,
            FunctionDefinition, MessageContent, ResponseFormat, Tool, ToolChoice,
        },
    },
};

/// Map an OpenAI role onto the Gemini role vocabulary
pub fn map_role(role: &str) -> String {
    match role {
        "assistant" => "model".to_string(),
        "tool" => "function".to_string(),
        other => other.to_lowercase(),
    }
}

/// Convert an OpenAI-shaped request into a Gemini GenerateContentRequest.
///
/// Returns the request plus warnings about parameters the Gemini schema has
/// no equivalent for. `image_fetcher` is the pluggable downloader for
/// image-URL parts; without one they degrade to a text placeholder.
pub async fn convert_request(
    openai_req: &ChatCompletionRequest,
    image_fetcher: Option<&dyn ImageFetcher>,
) -> Result<(GenerateContentRequest, ConversionWarnings), GatewayError> {
    openai_req.validate()?;

    if let Some(n) = openai_req.n {
        if n > 1 {
            return Err(GatewayError::InvalidRequest(format!(
                "candidate_count {} not supported: Gemini-family providers accept only 1",
                n
            )));
        }
    }

    let mut warnings = ConversionWarnings::new();
    for (param, present) in [
        ("seed", openai_req.seed.is_some()),
        ("presence_penalty", openai_req.presence_penalty.is_some()),
        ("frequency_penalty", openai_req.frequency_penalty.is_some()),
    ] {
        if present {
            tracing::warn!(param = param, "Parameter not supported by Gemini, ignoring");
            warnings.add_unsupported_param(param, "Gemini");
        }
    }

    let (system_instruction, contents) =
        convert_messages(&openai_req.messages, image_fetcher, &mut warnings).await?;

    let generation_config = build_generation_config(openai_req)?;
    let (tools, tool_config) = convert_tools_and_choice(openai_req)?;

    let request = GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
        safety_settings: Some(permissive_safety_settings()),
        tools,
        tool_config,
    };

    Ok((request, warnings))
}

/// Lift system messages out of the history and convert the rest.
///
/// The first system message becomes the system instruction; later ones are
/// dropped, matching Gemini's single-instruction model.
async fn convert_messages(
    messages: &[ChatMessage],
    image_fetcher: Option<&dyn ImageFetcher>,
    warnings: &mut ConversionWarnings,
) -> Result<(Option<SystemInstruction>, Vec<Content>), GatewayError> {
    let mut system_instruction: Option<SystemInstruction> = None;
    let mut contents = Vec::new();
    // tool_call_id -> function name, filled as assistant turns are seen
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for message in messages {
        if message.role == "system" {
            if system_instruction.is_none() {
                let parts = convert_content_parts(message, image_fetcher, warnings).await?;
                system_instruction = Some(SystemInstruction { parts });
            } else {
                warnings.add_warning(
                    "Multiple system messages; Gemini keeps only the first".to_string(),
                );
            }
            continue;
        }

        let parts = convert_message(message, image_fetcher, &mut tool_names, warnings).await?;
        contents.push(Content {
            role: map_role(&message.role),
            parts,
        });
    }

    Ok((system_instruction, contents))
}

async fn convert_message(
    message: &ChatMessage,
    image_fetcher: Option<&dyn ImageFetcher>,
    tool_names: &mut HashMap<String, String>,
    warnings: &mut ConversionWarnings,
) -> Result<Vec<Part>, GatewayError> {
    let mut parts = Vec::new();

    match message.role.as_str() {
        "tool" => {
            // validate() guarantees the id refers to an emitted call
            let id = message.tool_call_id.as_deref().unwrap_or_default();
            let name = tool_names.get(id).cloned().ok_or_else(|| {
                GatewayError::InvalidRequest(format!(
                    "tool message references unknown tool_call_id '{}'",
                    id
                ))
            })?;
            parts.push(Part::FunctionResponse {
                function_response: FunctionResponse {
                    name,
                    response: parse_json_object_content(message, "tool")?,
                },
            });
        }
        "function" => {
            let name = message.name.clone().ok_or_else(|| {
                GatewayError::InvalidRequest("function message is missing a name".to_string())
            })?;
            parts.push(Part::FunctionResponse {
                function_response: FunctionResponse {
                    name,
                    response: parse_json_object_content(message, "function")?,
                },
            });
        }
        _ => {
            if message.content.is_some() {
                parts.extend(convert_content_parts(message, image_fetcher, warnings).await?);
            }
            if let Some(refusal) = &message.refusal {
                parts.push(Part::text(refusal.clone()));
            }
            if let Some(calls) = &message.tool_calls {
                for call in calls {
                    tool_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(Part::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: call.function.name.clone(),
                            args: parse_arguments(&call.function.name, &call.function.arguments)?,
                        },
                    });
                }
            }
            if let Some(call) = &message.function_call {
                tool_names.insert(call.name.clone(), call.name.clone());
                parts.push(Part::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: call.name.clone(),
                        args: parse_arguments(&call.name, &call.arguments)?,
                    },
                });
            }
        }
    }

    if parts.is_empty() {
        return Err(GatewayError::Conversion(format!(
            "{} message has no convertible content",
            message.role
        )));
    }

    Ok(parts)
}

async fn convert_content_parts(
    message: &ChatMessage,
    image_fetcher: Option<&dyn ImageFetcher>,
    warnings: &mut ConversionWarnings,
) -> Result<Vec<Part>, GatewayError> {
    let content = match &message.content {
        Some(content) => content,
        None => return Ok(Vec::new()),
    };

    match content {
        MessageContent::Text(text) => Ok(vec![Part::text(text.clone())]),
        MessageContent::Parts(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentPart::Text { text } => parts.push(Part::text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        let part = convert_image_part(&image_url.url, image_fetcher, warnings)
                            .await?;
                        parts.push(part);
                    }
                }
            }
            Ok(parts)
        }
    }
}

async fn convert_image_part(
    url: &str,
    image_fetcher: Option<&dyn ImageFetcher>,
    warnings: &mut ConversionWarnings,
) -> Result<Part, GatewayError> {
    if url.starts_with("data:") {
        let (mime_type, data) = image_utils::parse_data_url(url)?;
        return Ok(Part::InlineData {
            inline_data: InlineData { mime_type, data },
        });
    }

    match image_fetcher {
        Some(fetcher) => {
            let (mime_type, data) = fetcher.fetch(url).await?;
            Ok(Part::InlineData {
                inline_data: InlineData { mime_type, data },
            })
        }
        None => {
            warnings.add_warning(format!(
                "No image downloader configured; replaced image '{}' with a placeholder",
                url
            ));
            Ok(Part::text(format!("[image: {}]", url)))
        }
    }
}

fn parse_json_object_content(
    message: &ChatMessage,
    role: &str,
) -> Result<serde_json::Value, GatewayError> {
    let text = message
        .content
        .as_ref()
        .map(|c| c.extract_text())
        .unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value),
        _ => Err(GatewayError::InvalidRequest(format!(
            "{} message content must be a JSON object",
            role
        ))),
    }
}

fn parse_arguments(name: &str, arguments: &str) -> Result<serde_json::Value, GatewayError> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| {
        GatewayError::InvalidRequest(format!(
            "tool call '{}' has malformed JSON arguments: {}",
            name, e
        ))
    })
}

fn build_generation_config(
    openai_req: &ChatCompletionRequest,
) -> Result<Option<GenerationConfig>, GatewayError> {
    let (response_mime_type, response_schema) = match &openai_req.response_format {
        None => (None, None),
        Some(ResponseFormat::Text) => (Some("text/plain".to_string()), None),
        Some(ResponseFormat::JsonObject) => (Some("application/json".to_string()), None),
        Some(ResponseFormat::JsonSchema { json_schema }) => {
            let schema_value = json_schema.schema.as_ref().ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "json_schema response format requires a schema".to_string(),
                )
            })?;
            (
                Some("application/json".to_string()),
                Some(schema::translate_value(schema_value)?),
            )
        }
    };

    let has_any = openai_req.temperature.is_some()
        || openai_req.top_p.is_some()
        || openai_req.output_token_cap().is_some()
        || openai_req.stop.is_some()
        || openai_req.n.is_some()
        || response_mime_type.is_some();
    if !has_any {
        return Ok(None);
    }

    Ok(Some(GenerationConfig {
        temperature: openai_req.temperature,
        top_p: openai_req.top_p,
        top_k: None,
        candidate_count: openai_req.n,
        max_output_tokens: openai_req.output_token_cap(),
        stop_sequences: openai_req.stop.as_ref().map(|s| s.to_vec()),
        response_mime_type,
        response_schema,
    }))
}

fn convert_tools_and_choice(
    openai_req: &ChatCompletionRequest,
) -> Result<(Option<Vec<GeminiTool>>, Option<ToolConfig>), GatewayError> {
    let declarations = if let Some(tools) = &openai_req.tools {
        if tools.is_empty() {
            Vec::new()
        } else {
            convert_tools(tools)?
        }
    } else if let Some(functions) = &openai_req.functions {
        convert_functions(functions)?
    } else {
        Vec::new()
    };

    let tools = if declarations.is_empty() {
        None
    } else {
        Some(vec![GeminiTool {
            function_declarations: declarations,
        }])
    };

    let tool_config = match (&openai_req.tool_choice, &openai_req.function_call) {
        (Some(choice), _) => Some(convert_tool_choice(choice)?),
        (None, Some(choice)) => Some(convert_function_call_choice(choice)),
        (None, None) => None,
    };

    Ok((tools, tool_config))
}

fn convert_tools(tools: &[Tool]) -> Result<Vec<FunctionDeclaration>, GatewayError> {
    tools
        .iter()
        .map(|tool| {
            if tool.tool_type != "function" {
                return Err(GatewayError::InvalidRequest(format!(
                    "unsupported tool type '{}'",
                    tool.tool_type
                )));
            }
            declare_function(&tool.function, "Tool")
        })
        .collect()
}

fn convert_functions(
    functions: &[FunctionDefinition],
) -> Result<Vec<FunctionDeclaration>, GatewayError> {
    functions
        .iter()
        .map(|function| declare_function(function, "Function"))
        .collect()
}

fn declare_function(
    function: &FunctionDefinition,
    kind: &str,
) -> Result<FunctionDeclaration, GatewayError> {
    let parameters = function
        .parameters
        .as_ref()
        .map(schema::translate_value)
        .transpose()?;

    Ok(FunctionDeclaration {
        name: function.name.clone(),
        description: function
            .description
            .clone()
            .unwrap_or_else(|| format!("{} {}", kind, function.name)),
        parameters,
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Result<ToolConfig, GatewayError> {
    let config = match choice {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => FunctionCallingConfig {
                mode: "AUTO".to_string(),
                allowed_function_names: None,
            },
            "required" | "any" => FunctionCallingConfig {
                mode: "ANY".to_string(),
                allowed_function_names: None,
            },
            "none" => FunctionCallingConfig {
                mode: "NONE".to_string(),
                allowed_function_names: None,
            },
            other => {
                return Err(GatewayError::InvalidRequest(format!(
                    "unsupported tool_choice '{}'",
                    other
                )))
            }
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
            FunctionCallingConfig {
                mode: "ANY".to_string(),
                allowed_function_names: Some(vec![function.name.clone()]),
            }
        }
    };

    Ok(ToolConfig {
        function_calling_config: config,
    })
}

fn convert_function_call_choice(choice: &FunctionCallChoice) -> ToolConfig {
    let config = match choice {
        FunctionCallChoice::Mode(mode) => match mode.as_str() {
            "none" => FunctionCallingConfig {
                mode: "NONE".to_string(),
                allowed_function_names: None,
            },
            _ => FunctionCallingConfig {
                mode: "AUTO".to_string(),
                allowed_function_names: None,
            },
        },
        FunctionCallChoice::Named { name } => FunctionCallingConfig {
            mode: "ANY".to_string(),
            allowed_function_names: Some(vec![name.clone()]),
        },
    };

    ToolConfig {
        function_calling_config: config,
    }
}
