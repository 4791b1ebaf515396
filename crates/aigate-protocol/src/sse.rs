//! Incremental parsers for the two upstream stream framings: server-sent
//! events and newline-delimited JSON.
//!
//! Both parsers accept arbitrary byte chunks and surface only complete
//! units; a trailing partial line stays buffered until more bytes arrive or
//! `finish` is called.

use bytes::Bytes;

/// One server-sent event: optional `event:` name plus joined `data:` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(line) = take_line(&mut self.buffer) {
            self.accept_line(&line, &mut out);
        }
        out
    }

    /// Flush the trailing unterminated line and any half-built event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.accept_line(&line, &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn accept_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        // Comment line per the SSE spec.
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.pending_event = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.pending_data.push(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        if self.pending_event.is_none() && self.pending_data.is_empty() {
            return;
        }
        out.push(SseEvent {
            event: self.pending_event.take(),
            data: self.pending_data.join("\n"),
        });
        self.pending_data.clear();
    }
}

/// Splitter for newline-delimited JSON bodies (one document per line).
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: String,
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(line) = take_line(&mut self.buffer) {
            let line = line.trim();
            if !line.is_empty() {
                out.push(line.to_string());
            }
        }
        out
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Remove and return the next `\n`-terminated line, stripping a trailing CR.
fn take_line(buffer: &mut String) -> Option<String> {
    let pos = buffer.find('\n')?;
    let mut line: String = buffer.drain(..=pos).collect();
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Some(line)
}
