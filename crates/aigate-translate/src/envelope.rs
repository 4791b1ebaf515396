//! The neutral in-memory shape requests and responses pass through when
//! changing schema. Lowering is lossy by design: only the text surface,
//! ordered turns, system prompt, generation config and usage survive.

use aigate_protocol::{claude, gemini, openai};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_MAX_TOKENS: u64 = 8192;
pub const DEFAULT_GEMINI_MAX_TOKENS: u64 = 65536;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 0.9;

const FALLBACK_OPENAI_MODEL: &str = "gpt-3.5-turbo";
const FALLBACK_CLAUDE_MODEL: &str = "claude-3-7-sonnet-20250219";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Schema-independent request shape.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Schema-independent response shape.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub finish: FinishReason,
    pub usage: TokenUsage,
}

// ---- request lowering ----

pub fn lower_openai_request(req: &openai::ChatCompletionRequest) -> ChatRequest {
    let mut system_texts = Vec::new();
    let mut turns = Vec::new();
    for message in &req.messages {
        let text = message
            .content
            .as_ref()
            .map(openai::MessageContent::to_text)
            .unwrap_or_default();
        if message.role == "system" {
            system_texts.push(text);
        } else {
            turns.push(Turn {
                role: role_from_str(&message.role),
                text,
            });
        }
    }
    ChatRequest {
        model: req.model.clone(),
        system: join_nonempty(system_texts),
        turns,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream == Some(true),
    }
}

pub fn lower_claude_request(req: &claude::MessagesRequest) -> ChatRequest {
    let turns = req
        .messages
        .iter()
        .map(|message| Turn {
            role: role_from_str(&message.role),
            text: message.content.to_text(),
        })
        .collect();
    ChatRequest {
        model: req.model.clone(),
        system: req
            .system
            .as_ref()
            .map(claude::SystemPrompt::to_text)
            .filter(|text| !text.is_empty()),
        turns,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream == Some(true),
    }
}

pub fn lower_gemini_request(req: &gemini::GenerateContentRequest) -> ChatRequest {
    let turns = req
        .contents
        .iter()
        .map(|content| Turn {
            role: match content.role.as_deref() {
                Some("model") => Role::Assistant,
                _ => Role::User,
            },
            text: content.to_text(),
        })
        .collect();
    let config = req.generation_config.as_ref();
    ChatRequest {
        model: req.model.clone(),
        system: req
            .system_instruction
            .as_ref()
            .map(gemini::Content::to_text)
            .filter(|text| !text.is_empty()),
        turns,
        max_tokens: config.and_then(|config| config.max_output_tokens),
        temperature: config.and_then(|config| config.temperature),
        top_p: config.and_then(|config| config.top_p),
        stream: false,
    }
}

// ---- request raising ----

pub fn raise_openai_request(env: &ChatRequest) -> openai::ChatCompletionRequest {
    let mut messages = Vec::new();
    if let Some(system) = &env.system {
        messages.push(openai::ChatMessage::text("system", system.clone()));
    }
    for turn in &env.turns {
        messages.push(openai::ChatMessage::text(role_to_str(turn.role), turn.text.clone()));
    }
    openai::ChatCompletionRequest {
        model: Some(
            env.model
                .clone()
                .unwrap_or_else(|| FALLBACK_OPENAI_MODEL.to_string()),
        ),
        messages,
        max_tokens: Some(env.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        temperature: Some(env.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        top_p: Some(env.top_p.unwrap_or(DEFAULT_TOP_P)),
        stream: env.stream.then_some(true),
        extra: Default::default(),
    }
}

pub fn raise_claude_request(env: &ChatRequest) -> claude::MessagesRequest {
    let messages = env
        .turns
        .iter()
        .map(|turn| claude::MessageParam {
            role: role_to_str(turn.role).to_string(),
            content: claude::MessageContent::Blocks(vec![claude::ContentBlock::text(
                turn.text.clone(),
            )]),
            extra: Default::default(),
        })
        .collect();
    claude::MessagesRequest {
        model: Some(
            env.model
                .clone()
                .unwrap_or_else(|| FALLBACK_CLAUDE_MODEL.to_string()),
        ),
        system: env.system.clone().map(claude::SystemPrompt::Text),
        messages,
        max_tokens: Some(env.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        temperature: Some(env.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        top_p: Some(env.top_p.unwrap_or(DEFAULT_TOP_P)),
        stream: env.stream.then_some(true),
        anthropic_version: None,
        extra: Default::default(),
    }
}

pub fn raise_gemini_request(env: &ChatRequest) -> gemini::GenerateContentRequest {
    let contents = env
        .turns
        .iter()
        .map(|turn| {
            gemini::Content::text(
                Some(match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }),
                turn.text.clone(),
            )
        })
        .collect();
    gemini::GenerateContentRequest {
        model: env.model.clone(),
        contents,
        system_instruction: env
            .system
            .clone()
            .map(|text| gemini::Content::text(None, text)),
        generation_config: Some(gemini::GenerationConfig {
            max_output_tokens: Some(env.max_tokens.unwrap_or(DEFAULT_GEMINI_MAX_TOKENS)),
            temperature: Some(env.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            top_p: Some(env.top_p.unwrap_or(DEFAULT_TOP_P)),
            extra: Default::default(),
        }),
        extra: Default::default(),
    }
}

// ---- response lowering ----

pub fn lower_openai_response(resp: &openai::ChatCompletionResponse) -> ChatResponse {
    let choice = resp.choices.first();
    let text = choice
        .and_then(|choice| choice.message.content.clone())
        .unwrap_or_default();
    let finish = match choice.and_then(|choice| choice.finish_reason.as_deref()) {
        Some("stop") | None => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some(_) => FinishReason::Other,
    };
    let usage = resp
        .usage
        .as_ref()
        .map(|usage| TokenUsage {
            input: usage.prompt_tokens,
            output: usage.completion_tokens,
        })
        .unwrap_or_default();
    ChatResponse { text, finish, usage }
}

pub fn lower_claude_response(resp: &claude::MessagesResponse) -> ChatResponse {
    let finish = match resp.stop_reason.as_deref() {
        Some("end_turn") | None => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some(_) => FinishReason::Other,
    };
    ChatResponse {
        text: resp.text(),
        finish,
        usage: TokenUsage {
            input: resp.usage.input_tokens,
            output: resp.usage.output_tokens,
        },
    }
}

pub fn lower_gemini_response(resp: &gemini::GenerateContentResponse) -> ChatResponse {
    let finish = match resp
        .candidates
        .first()
        .and_then(|candidate| candidate.finish_reason.as_deref())
    {
        Some("STOP") | None => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some(_) => FinishReason::Other,
    };
    let usage = resp
        .usage_metadata
        .map(|usage| TokenUsage {
            input: usage.prompt_token_count,
            output: usage.candidates_token_count,
        })
        .unwrap_or_default();
    ChatResponse {
        text: resp.to_text(),
        finish,
        usage,
    }
}

// ---- response raising ----

pub fn raise_openai_response(env: &ChatResponse, model: &str) -> openai::ChatCompletionResponse {
    openai::ChatCompletionResponse {
        id: new_chat_id(),
        object: openai::OBJECT_CHAT_COMPLETION.to_string(),
        created: now_unix(),
        model: model.to_string(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::AssistantMessage {
                role: "assistant".to_string(),
                content: Some(env.text.clone()),
                extra: Default::default(),
            },
            finish_reason: Some(openai_finish(env.finish).to_string()),
            extra: Default::default(),
        }],
        usage: Some(openai::CompletionUsage {
            prompt_tokens: env.usage.input,
            completion_tokens: env.usage.output,
            total_tokens: env.usage.input + env.usage.output,
        }),
        extra: Default::default(),
    }
}

pub fn raise_claude_response(env: &ChatResponse, model: &str) -> claude::MessagesResponse {
    claude::MessagesResponse {
        id: new_message_id(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content: vec![claude::ContentBlock::text(env.text.clone())],
        stop_reason: Some(claude_finish(env.finish).to_string()),
        stop_sequence: Some(Value::Null),
        usage: claude::Usage {
            input_tokens: env.usage.input,
            output_tokens: env.usage.output,
        },
        extra: Default::default(),
    }
}

pub fn raise_gemini_response(env: &ChatResponse, _model: &str) -> gemini::GenerateContentResponse {
    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content::text(Some("model"), env.text.clone())),
            finish_reason: Some(gemini_finish(env.finish).to_string()),
            extra: Default::default(),
        }],
        usage_metadata: Some(gemini::UsageMetadata {
            prompt_token_count: env.usage.input,
            candidates_token_count: env.usage.output,
            total_token_count: env.usage.input + env.usage.output,
        }),
        text: None,
        extra: Default::default(),
    }
}

pub fn openai_finish(finish: FinishReason) -> &'static str {
    match finish {
        FinishReason::Length => "length",
        _ => "stop",
    }
}

pub fn claude_finish(finish: FinishReason) -> &'static str {
    match finish {
        FinishReason::Length => "max_tokens",
        _ => "end_turn",
    }
}

pub fn gemini_finish(finish: FinishReason) -> &'static str {
    match finish {
        FinishReason::Length => "MAX_TOKENS",
        _ => "STOP",
    }
}

pub fn new_chat_id() -> String {
    format!("chatcmpl_{}", Uuid::new_v4())
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4())
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn role_from_str(role: &str) -> Role {
    if role == "assistant" {
        Role::Assistant
    } else {
        Role::User
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn join_nonempty(texts: Vec<String>) -> Option<String> {
    let texts: Vec<String> = texts.into_iter().filter(|text| !text.is_empty()).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}
