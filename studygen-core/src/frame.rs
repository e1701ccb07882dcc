//! Frame parsing for generation event streams.
//!
//! A frame is one line of the stream. Only lines carrying the `data: ` prefix
//! are meaningful; their payload is a JSON envelope whose first candidate
//! holds a `functionCall` part with the `args` fragment to merge.
//!
//! A payload that ends before its JSON document does is held back and the next
//! data payload is appended to it. Text is only given up on once JSON parsing
//! reports a syntax error rather than an early end of input.

use serde::Deserialize;
use serde_json::{Map, Value, error::Category};
use tracing::{debug, warn};

use crate::error::StudyGenError;

/// Literal prefix of meaningful lines.
pub const DATA_PREFIX: &str = "data: ";

/// Explicit end-of-stream payload some producers send.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A single line of the stream, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame<'a> {
    pub raw: &'a str,
    pub is_data: bool,
    pub payload: Option<&'a str>,
}

impl<'a> StreamFrame<'a> {
    pub fn from_line(raw: &'a str) -> Self {
        let payload = raw.strip_prefix(DATA_PREFIX);
        Self {
            raw,
            is_data: payload.is_some(),
            payload,
        }
    }
}

/// The decoded function-call payload of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunk {
    pub function: Option<String>,
    pub args: Map<String, Value>,
}

// ---- Envelope wire structs (minimal) ----
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(rename = "functionCall", default)]
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

/// What the parser made of one line.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Blank line, comment, or a non-data field.
    Skipped,
    /// Data payload held back until more text arrives.
    Incomplete,
    /// A complete envelope carrying function-call arguments.
    Chunk(ParsedChunk),
    /// Valid JSON that does not carry function-call arguments.
    NoArgs,
    /// Text given up on as corrupt.
    Dropped { bytes: usize },
    /// The producer signalled the end of the stream.
    Done,
    /// The producer reported an error inside the stream.
    UpstreamError(StudyGenError),
}

/// Stateful parser fed one line at a time.
#[derive(Debug)]
pub struct FrameParser {
    pending: String,
    max_pending_bytes: usize,
    dropped: u64,
}

impl FrameParser {
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            pending: String::new(),
            max_pending_bytes,
            dropped: 0,
        }
    }

    /// Number of times buffered or malformed text has been given up on.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes currently held back waiting for the rest of a document.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push_line(&mut self, line: &str) -> FrameOutcome {
        let frame = StreamFrame::from_line(line);
        let Some(payload) = frame.payload else {
            if !frame.raw.trim().is_empty() && !frame.raw.starts_with(':') {
                debug!(line = frame.raw, "ignoring non-data line");
            }
            return FrameOutcome::Skipped;
        };
        if self.pending.is_empty() && payload.trim() == DONE_SENTINEL {
            return FrameOutcome::Done;
        }

        let had_pending = !self.pending.is_empty();
        self.pending.push_str(payload);
        match serde_json::from_str::<Value>(&self.pending) {
            Ok(value) => {
                self.pending.clear();
                interpret(value)
            }
            Err(e) if e.classify() == Category::Eof => {
                if had_pending && let Some(value) = standalone_envelope(payload) {
                    // A fresh envelope arrived while older text was still waiting.
                    let stale = self.pending.len() - payload.len();
                    self.pending.clear();
                    self.dropped += 1;
                    warn!(bytes = stale, "dropping buffered frame text that never completed");
                    return interpret(value);
                }
                if had_pending && opens_envelope(payload) {
                    let stale = self.pending.len() - payload.len();
                    self.pending.clear();
                    self.pending.push_str(payload);
                    self.dropped += 1;
                    warn!(bytes = stale, "new frame started before buffered text completed; dropping it");
                }
                if self.pending.len() > self.max_pending_bytes {
                    let bytes = self.pending.len();
                    self.pending.clear();
                    self.dropped += 1;
                    warn!(bytes, "dropping buffered frame text over the pending limit");
                    return FrameOutcome::Dropped { bytes };
                }
                FrameOutcome::Incomplete
            }
            Err(e) => {
                let combined = std::mem::take(&mut self.pending);
                self.dropped += 1;
                if !had_pending {
                    warn!(error = %e, bytes = combined.len(), "dropping malformed frame");
                    return FrameOutcome::Dropped { bytes: combined.len() };
                }
                // The held-back text may have been the corrupt part; give the
                // current payload a chance on its own.
                let stale = combined.len() - payload.len();
                warn!(error = %e, bytes = stale, "dropping buffered frame text that never completed");
                match self.push_line(line) {
                    FrameOutcome::Dropped { bytes } => FrameOutcome::Dropped { bytes: bytes + stale },
                    other => other,
                }
            }
        }
    }

    /// Called at end of stream. Reports any text still held back as dropped.
    pub fn finish(&mut self) -> Option<FrameOutcome> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes = self.pending.len();
        self.pending.clear();
        self.dropped += 1;
        warn!(bytes, "stream ended inside a frame; dropping buffered text");
        Some(FrameOutcome::Dropped { bytes })
    }
}

/// A payload that is a complete envelope on its own, not a continuation.
fn standalone_envelope(payload: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(payload).ok()?;
    (value.get("candidates").is_some() || value.get("error").is_some()).then_some(value)
}

/// A payload that begins a new envelope and is unfinished on its own.
fn opens_envelope(payload: &str) -> bool {
    let Some(rest) = payload.trim_start().strip_prefix('{') else {
        return false;
    };
    let rest = rest.trim_start();
    if !rest.starts_with("\"candidates\"") && !rest.starts_with("\"error\"") {
        return false;
    }
    matches!(serde_json::from_str::<Value>(payload), Err(e) if e.classify() == Category::Eof)
}

fn interpret(value: Value) -> FrameOutcome {
    if let Some(err) = value.get("error") {
        let message = match err {
            Value::String(s) => s.clone(),
            Value::Object(o) => o
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("error reported in stream")
                .to_string(),
            other => other.to_string(),
        };
        let code = err
            .get("code")
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "stream".to_string());
        return FrameOutcome::UpstreamError(StudyGenError::ProviderError { code, message });
    }

    let envelope: Envelope = match serde_json::from_value(value) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "frame does not match the candidate envelope");
            return FrameOutcome::NoArgs;
        }
    };
    let call = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| {
            content
                .parts
                .into_iter()
                .find_map(|p| p.function_call.filter(|c| c.args.is_some()))
        });
    match call {
        Some(FunctionCall {
            name,
            args: Some(args),
        }) => FrameOutcome::Chunk(ParsedChunk { function: name, args }),
        _ => FrameOutcome::NoArgs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_line(args: Value) -> String {
        let env = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "create_quiz", "args": args}}]}
            }]
        });
        format!("{DATA_PREFIX}{env}")
    }

    #[test]
    fn classifies_frames() {
        let f = StreamFrame::from_line("data: {}");
        assert!(f.is_data);
        assert_eq!(f.payload, Some("{}"));
        let f = StreamFrame::from_line(": keep-alive");
        assert!(!f.is_data);
        assert_eq!(f.payload, None);
        // the prefix includes the space
        assert!(!StreamFrame::from_line("data:{}").is_data);
    }

    #[test]
    fn extracts_args_from_envelope() {
        let mut p = FrameParser::new(1024);
        match p.push_line(&data_line(json!({"title": "Intro"}))) {
            FrameOutcome::Chunk(chunk) => {
                assert_eq!(chunk.function.as_deref(), Some("create_quiz"));
                assert_eq!(chunk.args.get("title"), Some(&json!("Intro")));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn skips_blank_comment_and_event_lines() {
        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line(""), FrameOutcome::Skipped));
        assert!(matches!(p.push_line(": ping"), FrameOutcome::Skipped));
        assert!(matches!(p.push_line("event: message"), FrameOutcome::Skipped));
    }

    #[test]
    fn split_document_emits_exactly_once_when_completed() {
        let full = data_line(json!({"questions": [{"question": "Q1"}]}));
        let payload = full.strip_prefix(DATA_PREFIX).unwrap();
        let (a, b) = payload.split_at(payload.len() / 2);

        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line(&format!("{DATA_PREFIX}{a}")), FrameOutcome::Incomplete));
        assert!(p.pending_len() > 0);
        match p.push_line(&format!("{DATA_PREFIX}{b}")) {
            FrameOutcome::Chunk(chunk) => {
                assert_eq!(chunk.args["questions"][0]["question"], json!("Q1"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(p.pending_len(), 0);
        assert!(p.finish().is_none());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line("data: {\"a\": nope}"), FrameOutcome::Dropped { .. }));
        assert_eq!(p.pending_len(), 0);
        assert_eq!(p.dropped(), 1);
    }

    #[test]
    fn stale_pending_text_does_not_poison_next_frame() {
        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line("data: {\"candidates\": ["), FrameOutcome::Incomplete));
        match p.push_line(&data_line(json!({"title": "T"}))) {
            FrameOutcome::Chunk(chunk) => assert_eq!(chunk.args["title"], json!("T")),
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(p.pending_len(), 0);
        assert_eq!(p.dropped(), 1);
    }

    #[test]
    fn split_frame_after_stale_text_is_recovered() {
        let full = data_line(json!({"title": "T"}));
        let payload = full.strip_prefix(DATA_PREFIX).unwrap();
        let cut = payload.find("\"T\"").unwrap() + 3;
        let (a, b) = payload.split_at(cut);

        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line("data: {\"candidates\": ["), FrameOutcome::Incomplete));
        assert!(matches!(p.push_line(&format!("{DATA_PREFIX}{a}")), FrameOutcome::Incomplete));
        assert_eq!(p.dropped(), 1);
        assert_eq!(p.pending_len(), a.len());
        match p.push_line(&format!("{DATA_PREFIX}{b}")) {
            FrameOutcome::Chunk(chunk) => assert_eq!(chunk.args["title"], json!("T")),
            other => panic!("expected chunk, got {other:?}"),
        }
        match p.push_line(&data_line(json!({"title": "U"}))) {
            FrameOutcome::Chunk(chunk) => assert_eq!(chunk.args["title"], json!("U")),
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(p.dropped(), 1);
        assert!(p.finish().is_none());
    }

    #[test]
    fn pending_limit_drops_runaway_text() {
        let mut p = FrameParser::new(8);
        match p.push_line("data: {\"title\": \"a very long unterminated") {
            FrameOutcome::Dropped { bytes } => assert!(bytes > 8),
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[test]
    fn unfinished_text_is_reported_at_end() {
        let mut p = FrameParser::new(1024);
        let _ = p.push_line("data: {\"cand");
        assert!(matches!(p.finish(), Some(FrameOutcome::Dropped { bytes: 6 })));
    }

    #[test]
    fn done_sentinel_and_non_envelope_json() {
        let mut p = FrameParser::new(1024);
        assert!(matches!(p.push_line("data: [DONE]"), FrameOutcome::Done));
        assert!(matches!(p.push_line("data: {\"candidates\": []}"), FrameOutcome::NoArgs));
        assert!(matches!(
            p.push_line("data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"hi\"}]}}]}"),
            FrameOutcome::NoArgs
        ));
        assert!(matches!(p.push_line("data: 42"), FrameOutcome::NoArgs));
    }

    #[test]
    fn function_call_need_not_be_first_part() {
        let mut p = FrameParser::new(1024);
        let line = format!(
            "{DATA_PREFIX}{}",
            json!({"candidates": [{"content": {"parts": [
                {"text": "thinking"},
                {"functionCall": {"args": {"summary": "abc"}}}
            ]}}]})
        );
        match p.push_line(&line) {
            FrameOutcome::Chunk(chunk) => {
                assert_eq!(chunk.function, None);
                assert_eq!(chunk.args["summary"], json!("abc"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn call_without_args_does_not_hide_later_call() {
        let mut p = FrameParser::new(1024);
        let line = format!(
            "{DATA_PREFIX}{}",
            json!({"candidates": [{"content": {"parts": [
                {"functionCall": {"name": "create_notes"}},
                {"functionCall": {"name": "create_notes", "args": {"title": "N"}}}
            ]}}]})
        );
        match p.push_line(&line) {
            FrameOutcome::Chunk(chunk) => assert_eq!(chunk.args["title"], json!("N")),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn error_frame_is_surfaced() {
        let mut p = FrameParser::new(1024);
        match p.push_line("data: {\"error\": {\"code\": 500, \"message\": \"model overloaded\"}}") {
            FrameOutcome::UpstreamError(StudyGenError::ProviderError { code, message }) => {
                assert_eq!(code, "500");
                assert_eq!(message, "model overloaded");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
