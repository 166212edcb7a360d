use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::{
    converters::{anthropic_response, gemini_streaming},
    error::GatewayError,
    models::{
        gemini::GenerateContentResponse,
        openai::{
            ChatCompletionChunk, ChatCompletionResponse, ChunkChoice, Delta,
        },
    },
};

pub type ChunkResult = Result<ChatCompletionChunk, GatewayError>;

/// The uniform chunk stream handed to the client handler. Dropping the
/// receiver cancels the producer task at its next send.
pub type ChunkStream = mpsc::Receiver<ChunkResult>;

const CHANNEL_CAPACITY: usize = 32;

/// Frame a chunk for the `data: <json>\n\n` SSE contract
pub fn sse_frame(chunk: &ChatCompletionChunk) -> Result<String, GatewayError> {
    Ok(format!("data: {}\n\n", serde_json::to_string(chunk)?))
}

/// Stream terminator frame
pub fn sse_done() -> &'static str {
    "data: [DONE]\n\n"
}

/// Forward an OpenAI-native SSE response into a chunk stream.
///
/// The reader task exits on `[DONE]`, upstream close, consumer drop, or the
/// first unrecoverable error (sent in-band before close).
pub fn spawn_openai_sse_stream(response: reqwest::Response) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event.data.trim() == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                        Ok(chunk) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                // consumer went away
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping unparseable stream chunk");
                        }
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(GatewayError::TransientUpstream {
                            status: None,
                            message: format!("stream error: {}", e),
                        }))
                        .await;
                    break;
                }
            }
        }
    });

    rx
}

/// Forward a Gemini `alt=sse` response as OpenAI chunks
pub fn spawn_gemini_sse_stream(
    response: reqwest::Response,
    request_id: String,
    model: String,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut is_first_chunk = true;
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let gemini_chunk =
                        match serde_json::from_str::<GenerateContentResponse>(&event.data) {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping unparseable Gemini chunk");
                                continue;
                            }
                        };
                    match gemini_streaming::convert_streaming_chunk(
                        &gemini_chunk,
                        &request_id,
                        &model,
                        &mut is_first_chunk,
                    ) {
                        Ok(Some(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(GatewayError::TransientUpstream {
                            status: None,
                            message: format!("stream error: {}", e),
                        }))
                        .await;
                    break;
                }
            }
        }
    });

    rx
}

/// Forward an Anthropic SSE response as OpenAI chunks
pub fn spawn_anthropic_sse_stream(
    response: reqwest::Response,
    request_id: String,
    model: String,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let stream_event = match serde_json::from_str::<
                        crate::models::anthropic::StreamEvent,
                    >(&event.data)
                    {
                        Ok(event) => event,
                        Err(_) => continue, // pings and unknown event payloads
                    };
                    if stream_event.event_type == "message_stop" {
                        break;
                    }
                    if let Some(chunk) = anthropic_response::convert_stream_event(
                        &stream_event,
                        &request_id,
                        &model,
                    ) {
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(Err(GatewayError::TransientUpstream {
                            status: None,
                            message: format!("stream error: {}", e),
                        }))
                        .await;
                    break;
                }
            }
        }
    });

    rx
}

/// Synthesize a stream from a non-streaming response.
///
/// Fixed three-chunk order: role, content, then a terminator carrying the
/// finish reason and total usage.
pub fn emulate_stream(response: ChatCompletionResponse) -> ChunkStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let choice = match response.choices.first() {
            Some(choice) => choice,
            None => {
                let _ = tx
                    .send(Err(GatewayError::Conversion(
                        "response has no choices to stream".to_string(),
                    )))
                    .await;
                return;
            }
        };

        let base = |delta: Delta, finish_reason: Option<String>| ChatCompletionChunk {
            id: response.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: response.created,
            model: response.model.clone(),
            choices: vec![ChunkChoice {
                index: choice.index,
                delta,
                finish_reason,
            }],
            usage: None,
        };

        let role_chunk = base(
            Delta {
                role: Some(choice.message.role.clone()),
                content: None,
                tool_calls: None,
            },
            None,
        );
        if tx.send(Ok(role_chunk)).await.is_err() {
            return;
        }

        let content = choice
            .message
            .content
            .as_ref()
            .map(|c| c.extract_text())
            .unwrap_or_default();
        let content_chunk = base(
            Delta {
                role: None,
                content: Some(content),
                tool_calls: None,
            },
            None,
        );
        if tx.send(Ok(content_chunk)).await.is_err() {
            return;
        }

        let mut final_chunk = base(
            Delta::default(),
            Some(
                choice
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "stop".to_string()),
            ),
        );
        final_chunk.usage = response.usage.clone();
        let _ = tx.send(Ok(final_chunk)).await;
    });

    rx
}
