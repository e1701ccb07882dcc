//! One generation request from submit to a terminal state.
//!
//! A session owns the accumulator for its current request. `run` drives the
//! line stream through the frame parser and merger, publishing a [`Progress`]
//! snapshot after every merge, and always ends in `Complete` or `Failed`.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;
use uuid::Uuid;

use crate::backend::GenerationBackend;
use crate::config::StreamCfg;
use crate::error::{CoreResult, ErrorKind, StudyGenError};
use crate::frame::{FrameOutcome, FrameParser, ParsedChunk};
use crate::generators::GeneratorKind;
use crate::http_client::RequestCtx;
use crate::merge::{MergeSchema, ResultAccumulator};
use crate::model::GenerationParams;
use crate::normalizer::Normalizer;
use crate::store::{GeneratedMaterial, MaterialStore};
use crate::telemetry::{self, GenerationLog, SaveLog};

/// Why a generation failed, in a form that can be cloned into snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    /// Diagnostic text.
    pub message: String,
    /// Text fit for a transient notification.
    pub user_message: String,
}

impl From<&StudyGenError> for Failure {
    fn from(e: &StudyGenError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            user_message: e.user_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Requesting,
    Streaming,
    Complete,
    Failed(Failure),
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub lines: u64,
    pub data_frames: u64,
    /// Frames that carried function-call arguments.
    pub chunks: u64,
    /// Chunks that changed the accumulator.
    pub merges: u64,
    pub dropped_frames: u64,
    pub skipped_fields: u64,
}

/// Snapshot published on the progress channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub state: GenerationState,
    pub stats: StreamStats,
    /// Accumulated result so far.
    pub result: Value,
}

/// Stops a running generation from another task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|a| *a).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct GenerationSession {
    kind: GeneratorKind,
    schema: MergeSchema,
    cfg: StreamCfg,
    normalizer: Normalizer,
    state: GenerationState,
    acc: ResultAccumulator,
    stats: StreamStats,
    params: Option<GenerationParams>,
    request_id: Option<String>,
    first_chunk_ms: Option<u64>,
    progress_tx: watch::Sender<Progress>,
    abort_tx: Arc<watch::Sender<bool>>,
}

impl GenerationSession {
    pub fn new(kind: GeneratorKind, cfg: StreamCfg) -> CoreResult<Self> {
        let (progress_tx, _) = watch::channel(Progress {
            state: GenerationState::Idle,
            stats: StreamStats::default(),
            result: Value::Object(Default::default()),
        });
        let (abort_tx, _) = watch::channel(false);
        Ok(Self {
            kind,
            schema: kind.schema(),
            cfg,
            normalizer: Normalizer::new()?,
            state: GenerationState::Idle,
            acc: ResultAccumulator::new(),
            stats: StreamStats::default(),
            params: None,
            request_id: None,
            first_chunk_ms: None,
            progress_tx,
            abort_tx: Arc::new(abort_tx),
        })
    }

    pub fn kind(&self) -> GeneratorKind {
        self.kind
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn result(&self) -> &ResultAccumulator {
        &self.acc
    }

    pub fn typed_result<T: DeserializeOwned>(&self) -> CoreResult<T> {
        self.acc.to_typed()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Normalized parameters of the current request.
    pub fn params(&self) -> Option<&GenerationParams> {
        self.params.as_ref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress_tx.subscribe()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: self.abort_tx.clone(),
        }
    }

    /// Back to `Idle`, dropping the previous result. Clears a pending abort.
    pub fn reset(&mut self) {
        self.acc = ResultAccumulator::new();
        self.stats = StreamStats::default();
        self.params = None;
        self.request_id = None;
        self.first_chunk_ms = None;
        self.abort_tx.send_replace(false);
        self.transition(GenerationState::Idle);
    }

    fn transition(&mut self, next: GenerationState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "generation state");
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.progress_tx.send_replace(Progress {
            state: self.state.clone(),
            stats: self.stats,
            result: self.acc.to_value(),
        });
    }

    /// Runs one request to a terminal state and returns it.
    ///
    /// Generation failures end in `Failed`; an `Err` only means the session
    /// was not `Idle`.
    pub async fn run(
        &mut self,
        backend: &dyn GenerationBackend,
        params: GenerationParams,
    ) -> CoreResult<GenerationState> {
        if self.state != GenerationState::Idle {
            return Err(StudyGenError::Validation(format!(
                "cannot start a generation while {}; reset first",
                self.state.as_str()
            )));
        }
        let request_id = Uuid::new_v4().to_string();
        self.request_id = Some(request_id.clone());
        self.acc = ResultAccumulator::new();
        self.stats = StreamStats::default();
        self.first_chunk_ms = None;

        let span = info_span!(
            "generation",
            generator = %self.kind,
            backend = backend.name(),
            request_id = %request_id,
        );
        let started = Instant::now();
        let outcome = self.drive(backend, params, &request_id, started).instrument(span).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut log = GenerationLog::new()
            .generator(self.kind.tag())
            .backend(backend.name())
            .request_id(&request_id)
            .created_at_ms(now_ms())
            .latency_ms(latency_ms)
            .first_chunk_ms_opt(self.first_chunk_ms)
            .items_opt(self.kind.primary_list().map(|l| self.acc.list_len(l) as u64));
        match outcome {
            Ok(()) => {
                info!(generator = %self.kind, request_id, latency_ms, merges = self.stats.merges, "generation complete");
                log = log.outcome("complete");
                self.transition(GenerationState::Complete);
            }
            Err(e) => {
                let failure = Failure::from(&e);
                warn!(generator = %self.kind, request_id, error = %e, kind = failure.kind.as_str(), "generation failed");
                log = log.outcome("failed").error(failure.kind.as_str(), &failure.message);
                self.transition(GenerationState::Failed(failure));
            }
        }
        log.lines = self.stats.lines;
        log.data_frames = self.stats.data_frames;
        log.chunks = self.stats.chunks;
        log.merges = self.stats.merges;
        log.dropped_frames = self.stats.dropped_frames;
        log.skipped_fields = self.stats.skipped_fields;
        telemetry::emit_generation(log);
        Ok(self.state.clone())
    }

    async fn drive(
        &mut self,
        backend: &dyn GenerationBackend,
        params: GenerationParams,
        request_id: &str,
        started: Instant,
    ) -> CoreResult<()> {
        let mut abort = self.abort_tx.subscribe();
        self.transition(GenerationState::Requesting);

        let params = self.normalizer.normalize(self.kind, params)?;
        let body = self.kind.request_body(&params);
        self.params = Some(params);

        let ctx = RequestCtx {
            request_id: Some(request_id),
            idempotency_key: None,
        };
        let mut stream = tokio::select! {
            biased;
            _ = aborted(&mut abort) => return Err(StudyGenError::Cancelled),
            opened = backend.open_stream(self.kind, &body, &ctx) => opened?,
        };
        self.transition(GenerationState::Streaming);

        let idle = Duration::from_millis(self.cfg.idle_timeout_ms);
        let mut parser = FrameParser::new(self.cfg.max_pending_bytes);
        loop {
            let next = tokio::select! {
                biased;
                _ = aborted(&mut abort) => return Err(StudyGenError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => next,
            };
            let line = match next {
                Err(_) => {
                    return Err(StudyGenError::StreamIdleTimeout {
                        idle_ms: self.cfg.idle_timeout_ms,
                    });
                }
                Ok(None) => break,
                Ok(Some(item)) => item?.line,
            };
            self.stats.lines += 1;
            let outcome = parser.push_line(&line);
            if !matches!(outcome, FrameOutcome::Skipped) {
                self.stats.data_frames += 1;
            }
            match outcome {
                FrameOutcome::Chunk(chunk) => self.apply(chunk, started),
                FrameOutcome::Done => {
                    debug!("end-of-stream marker received");
                    break;
                }
                FrameOutcome::UpstreamError(e) => return Err(e),
                FrameOutcome::NoArgs => debug!("frame carried no function-call arguments"),
                FrameOutcome::Skipped | FrameOutcome::Incomplete | FrameOutcome::Dropped { .. } => {}
            }
            self.stats.dropped_frames = parser.dropped();
        }
        parser.finish();
        self.stats.dropped_frames = parser.dropped();

        if self.acc.is_empty() {
            return Err(StudyGenError::ProviderError {
                code: "empty".into(),
                message: "the generator returned no content".into(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, chunk: ParsedChunk, started: Instant) {
        self.stats.chunks += 1;
        let report = self.acc.merge(&self.schema, &chunk.args);
        self.stats.skipped_fields += report.skipped.len() as u64;
        if report.changed() {
            self.stats.merges += 1;
            if self.first_chunk_ms.is_none() {
                self.first_chunk_ms = Some(started.elapsed().as_millis() as u64);
            }
            self.publish();
        }
    }

    /// Persists the finished result. Only valid in `Complete`; a failed save
    /// leaves the session `Complete` so it can be retried.
    pub async fn save(&self, store: &dyn MaterialStore, user_id: &str) -> CoreResult<GeneratedMaterial> {
        if self.state != GenerationState::Complete {
            return Err(StudyGenError::Validation(format!(
                "nothing to save while {}",
                self.state.as_str()
            )));
        }
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| StudyGenError::Validation("no request parameters recorded".into()))?;
        let material = self.kind.material(&self.acc, params, user_id);

        let started = Instant::now();
        let result = store.insert(material).await.map_err(|e| match e {
            StudyGenError::Persistence(_) => e,
            other => StudyGenError::Persistence(other.to_string()),
        });
        let mut log = SaveLog {
            generator: Some(self.kind.tag().to_string()),
            store: Some(store.name().to_string()),
            request_id: self.request_id.clone(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
            ..Default::default()
        };
        match &result {
            Ok(rec) => {
                info!(generator = %self.kind, id = %rec.id, store = store.name(), "material saved");
                log.material_id = Some(rec.id.to_string());
            }
            Err(e) => {
                warn!(generator = %self.kind, store = store.name(), error = %e, "save failed");
                log.error_message = Some(e.to_string());
            }
        }
        telemetry::emit_save(log);
        result
    }
}
