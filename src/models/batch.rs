use serde::{Deserialize, Serialize};

use crate::models::openai::{ChatCompletionRequest, ChatCompletionResponse};

/// One line of the JSONL blob uploaded for a deferred batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInputLine {
    /// The gateway's job id (sha-256 of the canonical request encoding)
    pub custom_id: String,
    /// Always "POST"
    pub method: String,
    /// Always "/v1/chat/completions"
    pub url: String,
    pub body: ChatCompletionRequest,
}

impl BatchInputLine {
    pub fn new(custom_id: String, body: ChatCompletionRequest) -> Self {
        Self {
            custom_id,
            method: "POST".to_string(),
            url: "/v1/chat/completions".to_string(),
            body,
        }
    }
}

/// One line of the downloaded batch output file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutputLine {
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BatchOutputResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchLineError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutputResponse {
    pub status_code: u16,
    pub body: ChatCompletionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLineError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// Response of `POST /v1/files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub object: String,
    pub bytes: u64,
    pub filename: String,
    pub purpose: String,
}

/// Response of the `/v1/batches` endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchObject {
    pub id: String,
    pub object: String,
    pub endpoint: String,
    pub input_file_id: String,
    pub completion_window: String,
    /// "validating", "in_progress", "finalizing", "completed", "failed",
    /// "expired", "cancelling", "cancelled"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl BatchObject {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "completed" | "failed" | "expired" | "cancelled"
        )
    }
}
