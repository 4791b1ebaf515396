//! System-prompt injection, applied in the client's schema before any
//! protocol conversion.

use aigate_common::SystemPromptMode;
use aigate_protocol::{claude, gemini, openai};
use aigate_translate::ProtocolRequest;

pub fn apply_system_prompt(
    request: &mut ProtocolRequest,
    content: &str,
    mode: SystemPromptMode,
) {
    if content.is_empty() {
        return;
    }
    match request {
        ProtocolRequest::OpenAI(req) => inject_openai(req, content, mode),
        ProtocolRequest::Claude(req) => inject_claude(req, content, mode),
        ProtocolRequest::Gemini(req) => inject_gemini(req, content, mode),
    }
}

fn inject_openai(req: &mut openai::ChatCompletionRequest, content: &str, mode: SystemPromptMode) {
    if let Some(message) = req.messages.iter_mut().find(|message| message.role == "system") {
        let updated = match mode {
            SystemPromptMode::Overwrite => content.to_string(),
            SystemPromptMode::Append => {
                let existing = message
                    .content
                    .as_ref()
                    .map(openai::MessageContent::to_text)
                    .unwrap_or_default();
                format!("{existing}\n\n{content}")
            }
        };
        message.content = Some(openai::MessageContent::Text(updated));
        return;
    }
    req.messages
        .insert(0, openai::ChatMessage::text("system", content));
}

fn inject_claude(req: &mut claude::MessagesRequest, content: &str, mode: SystemPromptMode) {
    let updated = match (&req.system, mode) {
        (Some(existing), SystemPromptMode::Append) => {
            format!("{}\n\n{content}", existing.to_text())
        }
        _ => content.to_string(),
    };
    req.system = Some(claude::SystemPrompt::Text(updated));
}

fn inject_gemini(req: &mut gemini::GenerateContentRequest, content: &str, mode: SystemPromptMode) {
    match (&mut req.system_instruction, mode) {
        (Some(instruction), SystemPromptMode::Append) => {
            instruction.parts.push(gemini::Part::text(content));
        }
        (slot, _) => {
            *slot = Some(gemini::Content {
                role: None,
                parts: vec![gemini::Part::text(content)],
                extra: Default::default(),
            });
        }
    }
}
