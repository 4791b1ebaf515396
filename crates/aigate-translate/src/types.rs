use aigate_common::Protocol;
use aigate_protocol::{claude, gemini, openai};

/// A request body tagged with the schema it is written in.
#[derive(Debug, Clone)]
pub enum ProtocolRequest {
    OpenAI(openai::ChatCompletionRequest),
    Claude(claude::MessagesRequest),
    Gemini(gemini::GenerateContentRequest),
}

impl ProtocolRequest {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolRequest::OpenAI(_) => Protocol::OpenAI,
            ProtocolRequest::Claude(_) => Protocol::Claude,
            ProtocolRequest::Gemini(_) => Protocol::Gemini,
        }
    }

    /// The model named in the body, when the schema carries one.
    pub fn model(&self) -> Option<&str> {
        match self {
            ProtocolRequest::OpenAI(req) => req.model.as_deref(),
            ProtocolRequest::Claude(req) => req.model.as_deref(),
            ProtocolRequest::Gemini(req) => req.model.as_deref(),
        }
    }

    pub fn stream_requested(&self) -> bool {
        match self {
            ProtocolRequest::OpenAI(req) => req.stream == Some(true),
            ProtocolRequest::Claude(req) => req.stream == Some(true),
            ProtocolRequest::Gemini(_) => false,
        }
    }
}

/// A response body tagged with the schema it is written in.
#[derive(Debug, Clone)]
pub enum ProtocolResponse {
    OpenAI(openai::ChatCompletionResponse),
    Claude(claude::MessagesResponse),
    Gemini(gemini::GenerateContentResponse),
}

impl ProtocolResponse {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolResponse::OpenAI(_) => Protocol::OpenAI,
            ProtocolResponse::Claude(_) => Protocol::Claude,
            ProtocolResponse::Gemini(_) => Protocol::Gemini,
        }
    }
}

/// One streaming increment tagged with the schema it is written in.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    OpenAI(openai::ChatCompletionChunk),
    Claude(claude::StreamEvent),
    Gemini(gemini::GenerateContentResponse),
}

impl StreamChunk {
    pub fn protocol(&self) -> Protocol {
        match self {
            StreamChunk::OpenAI(_) => Protocol::OpenAI,
            StreamChunk::Claude(_) => Protocol::Claude,
            StreamChunk::Gemini(_) => Protocol::Gemini,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            StreamChunk::OpenAI(chunk) => serde_json::to_value(chunk).unwrap_or_default(),
            StreamChunk::Claude(event) => serde_json::to_value(event).unwrap_or_default(),
            StreamChunk::Gemini(chunk) => serde_json::to_value(chunk).unwrap_or_default(),
        }
    }
}
