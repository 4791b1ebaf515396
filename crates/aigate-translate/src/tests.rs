use aigate_common::Protocol;
use aigate_protocol::{claude, gemini, openai};
use serde_json::json;

use super::chunk::{convert_chunk, delta_text};
use super::envelope::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use super::request::convert_request;
use super::response::convert_response;
use super::types::{ProtocolRequest, ProtocolResponse, StreamChunk};

fn openai_request(value: serde_json::Value) -> ProtocolRequest {
    ProtocolRequest::OpenAI(serde_json::from_value(value).unwrap())
}

fn claude_request(value: serde_json::Value) -> ProtocolRequest {
    ProtocolRequest::Claude(serde_json::from_value(value).unwrap())
}

fn gemini_request(value: serde_json::Value) -> ProtocolRequest {
    ProtocolRequest::Gemini(serde_json::from_value(value).unwrap())
}

// Scenario S1: OpenAI client body lowered into a Claude backend body.
#[test]
fn openai_to_claude_request_lifts_system_and_applies_defaults() {
    let converted = convert_request(
        openai_request(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        })),
        Protocol::Claude,
    );
    let ProtocolRequest::Claude(body) = converted else {
        panic!("expected claude body");
    };
    let body = serde_json::to_value(&body).unwrap();
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["system"], "be brief");
    assert_eq!(
        body["messages"],
        json!([{"role": "user", "content": [{"type": "text", "text": "hi"}]}])
    );
    assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    assert_eq!(body["temperature"], DEFAULT_TEMPERATURE);
    assert_eq!(body["top_p"], DEFAULT_TOP_P);
}

// Scenario S2: a Claude text delta re-emitted as an OpenAI chunk.
#[test]
fn claude_delta_becomes_openai_chunk() {
    let event: claude::StreamEvent = serde_json::from_value(json!({
        "type": "content_block_delta",
        "index": 0,
        "delta": {"type": "text_delta", "text": "Hello"}
    }))
    .unwrap();
    let converted = convert_chunk(StreamChunk::Claude(event), Protocol::OpenAI, "gpt-4").unwrap();
    let StreamChunk::OpenAI(chunk) = converted else {
        panic!("expected openai chunk");
    };
    assert!(chunk.id.starts_with("chatcmpl_"));
    assert_eq!(chunk.object, "chat.completion.chunk");
    assert_eq!(chunk.model, "gpt-4");
    assert_eq!(chunk.choices[0].index, 0);
    assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    assert!(chunk.choices[0].finish_reason.is_none());
}

// Scenario S3: Gemini response raised into a Claude response.
#[test]
fn gemini_response_becomes_claude_response() {
    let resp: gemini::GenerateContentResponse = serde_json::from_value(json!({
        "candidates": [{
            "content": {"parts": [{"text": "hi"}]},
            "finishReason": "MAX_TOKENS"
        }],
        "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
    }))
    .unwrap();
    let converted = convert_response(
        ProtocolResponse::Gemini(resp),
        Protocol::Claude,
        "claude-3-7-sonnet-20250219",
    );
    let ProtocolResponse::Claude(resp) = converted else {
        panic!("expected claude response");
    };
    assert!(resp.id.starts_with("msg_"));
    assert_eq!(resp.kind, "message");
    assert_eq!(resp.role, "assistant");
    assert_eq!(resp.content[0].kind, "text");
    assert_eq!(resp.content[0].text.as_deref(), Some("hi"));
    assert_eq!(resp.stop_reason.as_deref(), Some("max_tokens"));
    assert_eq!(resp.usage.input_tokens, 3);
    assert_eq!(resp.usage.output_tokens, 1);
}

// Invariant 1: A -> B -> A preserves model, ordered turns, system text and
// the generation config values both schemas carry.
#[test]
fn round_trips_preserve_the_translatable_surface() {
    let source = json!({
        "model": "gpt-4",
        "messages": [
            {"role": "system", "content": "sys"},
            {"role": "user", "content": "one"},
            {"role": "assistant", "content": "two"},
            {"role": "user", "content": "three"}
        ],
        "max_tokens": 1024,
        "temperature": 0.5,
        "top_p": 0.8
    });
    for target in [Protocol::Claude, Protocol::Gemini] {
        let there = convert_request(openai_request(source.clone()), target);
        let back = convert_request(there, Protocol::OpenAI);
        let ProtocolRequest::OpenAI(req) = back else {
            panic!("expected openai body");
        };
        assert_eq!(req.model.as_deref(), Some("gpt-4"), "via {target}");
        assert_eq!(req.max_tokens, Some(1024));
        assert_eq!(req.temperature, Some(0.5));
        assert_eq!(req.top_p, Some(0.8));
        let turns: Vec<(String, String)> = req
            .messages
            .iter()
            .map(|message| {
                (
                    message.role.clone(),
                    message.content.as_ref().unwrap().to_text(),
                )
            })
            .collect();
        assert_eq!(
            turns,
            vec![
                ("system".to_string(), "sys".to_string()),
                ("user".to_string(), "one".to_string()),
                ("assistant".to_string(), "two".to_string()),
                ("user".to_string(), "three".to_string()),
            ],
            "via {target}"
        );
    }
}

#[test]
fn claude_round_trip_through_gemini_keeps_roles_and_system() {
    let source = claude_request(json!({
        "model": "claude-3-7-sonnet-20250219",
        "system": "be nice",
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": "q"}]},
            {"role": "assistant", "content": [{"type": "text", "text": "a"}]}
        ],
        "max_tokens": 64
    }));
    let there = convert_request(source, Protocol::Gemini);
    let ProtocolRequest::Gemini(gem) = &there else {
        panic!("expected gemini body");
    };
    assert_eq!(gem.contents[0].role.as_deref(), Some("user"));
    assert_eq!(gem.contents[1].role.as_deref(), Some("model"));
    assert_eq!(
        gem.system_instruction.as_ref().unwrap().to_text(),
        "be nice"
    );
    assert_eq!(
        gem.generation_config.as_ref().unwrap().max_output_tokens,
        Some(64)
    );

    let back = convert_request(there, Protocol::Claude);
    let ProtocolRequest::Claude(req) = back else {
        panic!("expected claude body");
    };
    assert_eq!(req.model.as_deref(), Some("claude-3-7-sonnet-20250219"));
    assert_eq!(req.system.unwrap().to_text(), "be nice");
    assert_eq!(req.messages[0].role, "user");
    assert_eq!(req.messages[1].role, "assistant");
    assert_eq!(req.messages[1].content.to_text(), "a");
}

#[test]
fn gemini_defaults_use_the_larger_token_budget() {
    let converted = convert_request(
        openai_request(json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]})),
        Protocol::Gemini,
    );
    let ProtocolRequest::Gemini(req) = converted else {
        panic!("expected gemini body");
    };
    let config = req.generation_config.unwrap();
    assert_eq!(config.max_output_tokens, Some(65536));
    assert_eq!(config.temperature, Some(1.0));
    assert_eq!(config.top_p, Some(0.9));
}

#[test]
fn part_lists_concatenate_with_newlines() {
    let converted = convert_request(
        gemini_request(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "line one"}, {"text": "line two"}]}
            ]
        })),
        Protocol::OpenAI,
    );
    let ProtocolRequest::OpenAI(req) = converted else {
        panic!("expected openai body");
    };
    assert_eq!(
        req.messages[0].content.as_ref().unwrap().to_text(),
        "line one\nline two"
    );
}

// Finish-reason table, both directions.
#[test]
fn finish_reasons_follow_the_mapping_table() {
    let cases = [
        ("stop", "end_turn", "STOP"),
        ("length", "max_tokens", "MAX_TOKENS"),
        ("content_filter", "end_turn", "STOP"),
    ];
    for (openai_reason, claude_reason, gemini_reason) in cases {
        let resp: openai::ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl_x", "object": "chat.completion", "created": 0, "model": "m",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "t"},
                         "finish_reason": openai_reason}]
        }))
        .unwrap();

        let as_claude = convert_response(
            ProtocolResponse::OpenAI(resp.clone()),
            Protocol::Claude,
            "m",
        );
        let ProtocolResponse::Claude(as_claude) = as_claude else {
            panic!("expected claude response");
        };
        assert_eq!(as_claude.stop_reason.as_deref(), Some(claude_reason));

        let as_gemini =
            convert_response(ProtocolResponse::OpenAI(resp), Protocol::Gemini, "m");
        let ProtocolResponse::Gemini(as_gemini) = as_gemini else {
            panic!("expected gemini response");
        };
        assert_eq!(
            as_gemini.candidates[0].finish_reason.as_deref(),
            Some(gemini_reason)
        );
    }
}

// Invariant 2: usage totals survive translation.
#[test]
fn usage_counts_survive_translation() {
    let resp: claude::MessagesResponse = serde_json::from_value(json!({
        "id": "msg_1", "type": "message", "role": "assistant", "model": "m",
        "content": [{"type": "text", "text": "t"}],
        "stop_reason": "end_turn", "stop_sequence": null,
        "usage": {"input_tokens": 7, "output_tokens": 11}
    }))
    .unwrap();

    let as_openai = convert_response(
        ProtocolResponse::Claude(resp.clone()),
        Protocol::OpenAI,
        "m",
    );
    let ProtocolResponse::OpenAI(as_openai) = as_openai else {
        panic!("expected openai response");
    };
    let usage = as_openai.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 7);
    assert_eq!(usage.completion_tokens, 11);
    assert_eq!(usage.total_tokens, 18);

    let as_gemini = convert_response(ProtocolResponse::Claude(resp), Protocol::Gemini, "m");
    let ProtocolResponse::Gemini(as_gemini) = as_gemini else {
        panic!("expected gemini response");
    };
    let usage = as_gemini.usage_metadata.unwrap();
    assert_eq!(usage.prompt_token_count, 7);
    assert_eq!(usage.candidates_token_count, 11);
    assert_eq!(usage.total_token_count, 18);
}

#[test]
fn same_protocol_chunks_pass_through_untouched() {
    let event: claude::StreamEvent =
        serde_json::from_value(json!({"type": "message_stop"})).unwrap();
    let out = convert_chunk(StreamChunk::Claude(event), Protocol::Claude, "m").unwrap();
    let StreamChunk::Claude(claude::StreamEvent::MessageStop) = out else {
        panic!("pass-through should keep the event");
    };
}

#[test]
fn claude_meta_events_are_absorbed_cross_protocol() {
    for value in [
        json!({"type": "message_start", "message": {"id": "m", "type": "message", "role": "assistant", "model": "x", "content": [], "usage": {"input_tokens": 0, "output_tokens": 0}}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_stop"}),
        json!({"type": "ping"}),
    ] {
        let event: claude::StreamEvent = serde_json::from_value(value).unwrap();
        assert!(convert_chunk(StreamChunk::Claude(event), Protocol::OpenAI, "m").is_none());
    }
}

#[test]
fn openai_empty_delta_converts_to_empty_text() {
    let chunk: openai::ChatCompletionChunk = serde_json::from_value(json!({
        "id": "chatcmpl_1", "object": "chat.completion.chunk", "created": 0, "model": "m",
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    }))
    .unwrap();
    let out = convert_chunk(StreamChunk::OpenAI(chunk), Protocol::Claude, "m").unwrap();
    let StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta { delta, .. }) = out else {
        panic!("expected delta event");
    };
    assert_eq!(delta.text.as_deref(), Some(""));
}

#[test]
fn gemini_chunks_convert_from_parts_or_top_level_text() {
    let chunk: gemini::GenerateContentResponse = serde_json::from_value(json!({
        "candidates": [{"content": {"parts": [{"text": "inc"}], "role": "model"}}]
    }))
    .unwrap();
    assert_eq!(
        delta_text(&StreamChunk::Gemini(chunk.clone())).as_deref(),
        Some("inc")
    );

    let out = convert_chunk(StreamChunk::Gemini(chunk), Protocol::Gemini, "m").unwrap();
    assert!(matches!(out, StreamChunk::Gemini(_)));

    let bare: gemini::GenerateContentResponse =
        serde_json::from_value(json!({"text": "raw"})).unwrap();
    let out = convert_chunk(StreamChunk::Gemini(bare), Protocol::Claude, "m").unwrap();
    let StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta { delta, .. }) = out else {
        panic!("expected delta event");
    };
    assert_eq!(delta.text.as_deref(), Some("raw"));
}

#[test]
fn openai_chunks_convert_to_gemini_candidates() {
    let chunk: openai::ChatCompletionChunk = serde_json::from_value(json!({
        "id": "chatcmpl_1", "object": "chat.completion.chunk", "created": 0, "model": "m",
        "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": null}]
    }))
    .unwrap();
    let out = convert_chunk(StreamChunk::OpenAI(chunk), Protocol::Gemini, "m").unwrap();
    let StreamChunk::Gemini(chunk) = out else {
        panic!("expected gemini chunk");
    };
    let content = chunk.candidates[0].content.as_ref().unwrap();
    assert_eq!(content.role.as_deref(), Some("model"));
    assert_eq!(content.to_text(), "Hi");
}
