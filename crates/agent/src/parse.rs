//! Tool-call directives and `<think>` spans in model output.
//!
//! The model asks for a tool by writing a JSON directive
//! `{"tool": "<name>", "args": {...}}` in one of three forms:
//!
//! - wrapped: `<tool_call>{...}</tool_call>`
//! - fenced: a ```` ```json ```` code block
//! - bare: the object inline in the text
//!
//! Directives are returned in order of first appearance with exact
//! duplicates removed, and numbered `call_<seq>_<n>`.

use std::ops::Range;
use std::sync::LazyLock;

use llmcode_core::ToolCall;
use regex_lite::Regex;
use serde_json::Value;

static WRAPPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("valid regex")
});

static FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?[ \t]*\n?(.*?)```").expect("valid regex"));

static BARE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*"tool"\s*:"#).expect("valid regex"));

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Decode the first JSON value in `text`, returning it and its length.
fn leading_json(text: &str) -> Option<(Value, usize)> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    let value = values.next()?.ok()?;
    Some((value, values.byte_offset()))
}

/// `(name, args)` if `value` is a well-formed directive.
fn directive(value: &Value) -> Option<(String, Value)> {
    let obj = value.as_object()?;
    let name = obj.get("tool")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let args = match obj.get("args") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v @ Value::Object(_)) => v.clone(),
        Some(_) => return None,
    };
    Some((name.to_string(), args))
}

/// Parse directives out of `text`. `seq` numbers the assistant turn so ids
/// are unique across the session.
pub fn parse_tool_calls(text: &str, seq: usize) -> Vec<ToolCall> {
    let mut found: Vec<(usize, String, Value)> = Vec::new();
    let mut claimed: Vec<Range<usize>> = Vec::new();

    for re in [&*WRAPPED, &*FENCED] {
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if claimed.iter().any(|r| r.contains(&whole.start())) {
                continue;
            }
            let body = inner.as_str().trim();
            if let Some((value, _)) = leading_json(body)
                && let Some((name, args)) = directive(&value)
            {
                found.push((whole.start(), name, args));
                claimed.push(whole.range());
            }
        }
    }

    for m in BARE_START.find_iter(text) {
        let start = m.start();
        if claimed.iter().any(|r| r.contains(&start)) {
            continue;
        }
        if let Some((value, len)) = leading_json(&text[start..])
            && let Some((name, args)) = directive(&value)
        {
            found.push((start, name, args));
            claimed.push(start..start + len);
        }
    }

    found.sort_by_key(|(pos, _, _)| *pos);

    let mut calls: Vec<ToolCall> = Vec::new();
    for (_, name, args) in found {
        if calls.iter().any(|c| c.name == name && c.arguments == args) {
            continue;
        }
        let id = format!("call_{seq}_{}", calls.len() + 1);
        calls.push(ToolCall::new(id, name, args));
    }
    calls
}

/// Remove `<think>…</think>` spans. An unclosed span runs to the end.
pub fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(close) => rest = &after[close + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// A piece of streamed output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Thinking(String),
}

/// Splits a token stream into visible text and thinking, coping with tags
/// that arrive split across tokens.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    in_think: bool,
    pending: String,
}

impl ThinkFilter {
    fn segment(&self, text: &str) -> Segment {
        if self.in_think {
            Segment::Thinking(text.to_string())
        } else {
            Segment::Text(text.to_string())
        }
    }

    pub fn push(&mut self, token: &str) -> Vec<Segment> {
        self.pending.push_str(token);
        let mut out = Vec::new();
        loop {
            let tag = if self.in_think { THINK_CLOSE } else { THINK_OPEN };
            if let Some(at) = self.pending.find(tag) {
                if at > 0 {
                    out.push(self.segment(&self.pending[..at]));
                }
                self.pending.drain(..at + tag.len());
                self.in_think = !self.in_think;
                continue;
            }

            // Hold back a suffix that could be the start of the tag.
            let hold = (1..tag.len())
                .rev()
                .find(|&k| self.pending.ends_with(&tag[..k]))
                .unwrap_or(0);
            let emit = self.pending.len() - hold;
            if emit > 0 {
                out.push(self.segment(&self.pending[..emit]));
                self.pending.drain(..emit);
            }
            return out;
        }
    }

    /// Flush whatever is held back once the stream ends.
    pub fn finish(&mut self) -> Vec<Segment> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.pending);
        vec![self.segment(&rest)]
    }
}
