use serde::{Deserialize, Serialize};

/// One record per generation session that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GenerationLog {
    /// Generator tag, e.g. "mcqs".
    pub generator: Option<String>,
    /// Backend that served the stream, e.g. "edge", "replay".
    pub backend: Option<String>,
    pub request_id: Option<String>,

    /// "complete" or "failed".
    pub outcome: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,

    pub created_at_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    /// Time from request start to the first merged chunk.
    pub first_chunk_ms: Option<u64>,

    pub lines: u64,
    pub data_frames: u64,
    pub chunks: u64,
    pub merges: u64,
    pub dropped_frames: u64,
    pub skipped_fields: u64,
    /// Items in the generator's main list at the end.
    pub items: Option<u64>,
}

impl GenerationLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn generator(mut self, v: &str) -> Self {
        self.generator = Some(v.to_string());
        self
    }
    pub fn backend(mut self, v: &str) -> Self {
        self.backend = Some(v.to_string());
        self
    }
    pub fn request_id(mut self, v: &str) -> Self {
        self.request_id = Some(v.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }
    pub fn created_at_ms(mut self, v: u64) -> Self {
        self.created_at_ms = Some(v);
        self
    }
    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = Some(v);
        self
    }
    pub fn first_chunk_ms_opt(mut self, v: Option<u64>) -> Self {
        self.first_chunk_ms = v;
        self
    }
    pub fn items_opt(mut self, v: Option<u64>) -> Self {
        self.items = v;
        self
    }
}

/// Emitted after a save attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SaveLog {
    pub generator: Option<String>,
    pub store: Option<String>,
    pub request_id: Option<String>,
    pub material_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<u64>,
}
