//! Server-sent-events decoding for the routing server's stream format.
//!
//! Every event is a `data: {json}` line whose `type` is one of `start`,
//! `token`, `done` or `error`. `start` carries nothing the client needs
//! and is dropped.

use llmcode_core::{ErrorCode, StreamEvent, Usage};
use serde::Deserialize;
use tracing::trace;

/// Splits a byte stream into complete lines, buffering partial ones.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
}

impl LineDecoder {
    /// Feed bytes and get back every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Start,
    Token {
        #[serde(default, alias = "text")]
        content: String,
    },
    Done {
        #[serde(default)]
        usage: Usage,
    },
    Error {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    },
}

/// Decode one SSE line. Returns `None` for comments, blank lines, `start`
/// events and anything unparseable.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<WireEvent>(data) {
        Ok(WireEvent::Start) => None,
        Ok(WireEvent::Token { content }) => Some(StreamEvent::Token { text: content }),
        Ok(WireEvent::Done { usage }) => Some(StreamEvent::Done { usage }),
        Ok(WireEvent::Error { code, message }) => Some(StreamEvent::Error {
            code: ErrorCode::parse(&code),
            message,
        }),
        Err(e) => {
            trace!(error = %e, data, "Ignoring unparseable SSE data");
            None
        }
    }
}
