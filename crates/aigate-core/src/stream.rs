//! Backend chunk channel to HTTP response bridge.
//!
//! The copy task translates each chunk into the client's schema and frames
//! it for the wire. Dropping the response body (client disconnect) closes
//! the byte channel, which ends this task, which in turn drops the adapter
//! receiver and unblocks the backend reader.

use std::convert::Infallible;

use aigate_common::Protocol;
use aigate_translate::{convert_chunk, delta_text, StreamChunk};
use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::Response;
use bytes::Bytes;
use tokio_stream::wrappers::ReceiverStream;

use crate::prompt_log::PromptLogger;

pub fn streaming_response(
    client_protocol: Protocol,
    model: String,
    mut chunks: aigate_provider::ChunkReceiver,
    logger: PromptLogger,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(async move {
        let mut full_text = String::new();
        while let Some(chunk) = chunks.recv().await {
            let Some(converted) = convert_chunk(chunk, client_protocol, &model) else {
                continue;
            };
            if let Some(text) = delta_text(&converted) {
                full_text.push_str(&text);
            }
            if tx.send(Ok(encode_frame(client_protocol, &converted))).await.is_err() {
                return;
            }
        }
        if let Some(terminator) = stream_terminator(client_protocol) {
            let _ = tx.send(Ok(terminator)).await;
        }
        logger.log_output(&full_text).await;
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// One wire frame per chunk, in the client protocol's framing:
/// Claude pairs an `event:` line with the data line, OpenAI is data-only
/// SSE, Gemini is one JSON document per line.
pub fn encode_frame(protocol: Protocol, chunk: &StreamChunk) -> Bytes {
    let json = chunk.to_json().to_string();
    let frame = match (protocol, chunk) {
        (Protocol::Claude, StreamChunk::Claude(event)) => match event.event_type() {
            Some(name) => format!("event: {name}\ndata: {json}\n\n"),
            None => format!("data: {json}\n\n"),
        },
        (Protocol::Claude, _) | (Protocol::OpenAI, _) => format!("data: {json}\n\n"),
        (Protocol::Gemini, _) => format!("{json}\n"),
    };
    Bytes::from(frame)
}

/// The explicit end-of-stream marker; only the OpenAI framing has one.
pub fn stream_terminator(protocol: Protocol) -> Option<Bytes> {
    match protocol {
        Protocol::OpenAI => Some(Bytes::from_static(b"data: [DONE]\n\n")),
        Protocol::Claude | Protocol::Gemini => None,
    }
}
