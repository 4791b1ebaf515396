use aigate_common::Protocol;
use aigate_protocol::{claude, gemini, openai};

use crate::envelope::{new_chat_id, now_unix};
use crate::types::StreamChunk;

/// The incremental text a chunk carries, if any.
///
/// Claude events other than `content_block_delta` carry no text.
pub fn delta_text(chunk: &StreamChunk) -> Option<String> {
    match chunk {
        StreamChunk::OpenAI(chunk) => chunk
            .choices
            .first()
            .and_then(|choice| choice.delta.content.clone()),
        StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta { delta, .. }) => {
            delta.text.clone()
        }
        StreamChunk::Claude(_) => None,
        StreamChunk::Gemini(chunk) => Some(chunk.to_text()),
    }
}

/// Re-express one stream chunk in the target schema.
///
/// Same-protocol chunks pass through untouched (this is what keeps Claude
/// meta events alive on a Claude-to-Claude stream). Across protocols the
/// incremental text is extracted and re-wrapped; Claude events without a
/// text payload are absorbed and yield `None`.
pub fn convert_chunk(chunk: StreamChunk, target: Protocol, model: &str) -> Option<StreamChunk> {
    if chunk.protocol() == target {
        return Some(chunk);
    }
    let text = match &chunk {
        // Cross-protocol, non-delta Claude events are dropped silently.
        StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta { delta, .. }) => {
            delta.text.clone().unwrap_or_default()
        }
        StreamChunk::Claude(_) => return None,
        StreamChunk::OpenAI(chunk) => chunk
            .choices
            .first()
            .and_then(|choice| choice.delta.content.clone())
            .unwrap_or_default(),
        StreamChunk::Gemini(chunk) => chunk.to_text(),
    };
    Some(wrap_text(target, model, text))
}

fn wrap_text(target: Protocol, model: &str, text: String) -> StreamChunk {
    match target {
        Protocol::OpenAI => StreamChunk::OpenAI(openai::ChatCompletionChunk {
            id: new_chat_id(),
            object: openai::OBJECT_CHAT_COMPLETION_CHUNK.to_string(),
            created: now_unix(),
            model: model.to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta: openai::ChunkDelta {
                    role: None,
                    content: Some(text),
                    extra: Default::default(),
                },
                finish_reason: None,
                extra: Default::default(),
            }],
            extra: Default::default(),
        }),
        Protocol::Claude => StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta {
            index: 0,
            delta: claude::BlockDelta::text_delta(text),
        }),
        Protocol::Gemini => StreamChunk::Gemini(gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content::text(Some("model"), text)),
                finish_reason: None,
                extra: Default::default(),
            }],
            usage_metadata: None,
            text: None,
            extra: Default::default(),
        }),
    }
}
