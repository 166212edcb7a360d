pub mod anthropic_response;
pub mod gemini_response;
pub mod gemini_streaming;
pub mod openai_to_anthropic;
pub mod openai_to_gemini;
pub mod schema;
