use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{CoreResult, StudyGenError};
use crate::generators::GeneratorKind;
use crate::http_client::{ByteStream, HttpClient, LineStream, RequestCtx, SseStream};

/// Something that can start a generation and hand back its event-stream lines.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn open_stream(&self, kind: GeneratorKind, body: &Value, ctx: &RequestCtx<'_>) -> CoreResult<SseStream>;
}

/// Calls the hosted generation functions over HTTPS.
#[derive(Debug, Clone)]
pub struct EdgeFunctionBackend {
    http: HttpClient,
    base: String,
    token: Option<SecretString>,
    flush_tail: bool,
}

impl EdgeFunctionBackend {
    pub fn new(http: HttpClient, base: String, token: Option<SecretString>) -> Self {
        Self {
            http,
            base,
            token,
            flush_tail: true,
        }
    }

    /// Builds from config, reading the bearer token from `endpoint.token_env`.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let http = HttpClient::new(&cfg.http)?;
        let token = std::env::var(&cfg.endpoint.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);
        if token.is_none() {
            debug!(var = %cfg.endpoint.token_env, "no access token in environment");
        }
        let mut backend = Self::new(http, cfg.endpoint.functions_url.clone(), token);
        backend.flush_tail = cfg.stream.flush_trailing_line;
        Ok(backend)
    }

    pub fn url_for(&self, kind: GeneratorKind) -> String {
        format!("{}/{}", self.base.trim_end_matches('/'), kind.function_name())
    }
}

#[async_trait]
impl GenerationBackend for EdgeFunctionBackend {
    fn name(&self) -> &str {
        "edge"
    }

    async fn open_stream(&self, kind: GeneratorKind, body: &Value, ctx: &RequestCtx<'_>) -> CoreResult<SseStream> {
        let Some(token) = &self.token else {
            return Err(StudyGenError::Unauthenticated(
                "sign in to generate study materials".into(),
            ));
        };
        let auth = format!("Bearer {}", token.expose_secret());
        let url = self.url_for(kind);
        self.http
            .post_sse_lines(&url, body, &[("Authorization", auth.as_str())], ctx, self.flush_tail)
            .await
    }
}

/// Replays a recorded event-stream transcript, cut into fixed-size reads.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    transcript: Bytes,
    chunk_size: usize,
    flush_tail: bool,
}

impl ReplayBackend {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: Bytes::from(transcript.into()),
            chunk_size: 4096,
            flush_tail: true,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::new(s))
    }

    /// Size of each simulated network read. Zero is treated as one byte.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n.max(1);
        self
    }

    pub fn with_flush_tail(mut self, flush: bool) -> Self {
        self.flush_tail = flush;
        self
    }

    fn chunks(&self) -> ByteStream {
        let mut out: Vec<CoreResult<Bytes>> = Vec::new();
        let mut start = 0;
        while start < self.transcript.len() {
            let end = (start + self.chunk_size).min(self.transcript.len());
            out.push(Ok(self.transcript.slice(start..end)));
            start = end;
        }
        Box::pin(futures::stream::iter(out))
    }
}

#[async_trait]
impl GenerationBackend for ReplayBackend {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open_stream(&self, kind: GeneratorKind, _body: &Value, _ctx: &RequestCtx<'_>) -> CoreResult<SseStream> {
        debug!(generator = %kind, bytes = self.transcript.len(), chunk = self.chunk_size, "replaying transcript");
        Ok(Box::pin(LineStream::new(self.chunks(), self.flush_tail)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    async fn lines(mut s: SseStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(item) = s.next().await {
            out.push(item.unwrap().line);
        }
        out
    }

    #[tokio::test]
    async fn edge_backend_posts_to_function_with_bearer() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/functions/v1/generate-mcqs")
                .header("Authorization", "Bearer tok")
                .header("Accept", "text/event-stream")
                .json_body(json!({"topic": "Cells", "numQuestions": 2}));
            then.status(200)
                .header("Content-Type", "text/event-stream")
                .body("data: {}\n\n");
        });
        let backend = EdgeFunctionBackend::new(
            HttpClient::new_default().unwrap(),
            format!("{}/functions/v1/", server.base_url()),
            Some(SecretString::from("tok")),
        );
        let body = json!({"topic": "Cells", "numQuestions": 2});
        let s = backend
            .open_stream(GeneratorKind::Mcqs, &body, &RequestCtx::default())
            .await
            .unwrap();
        assert_eq!(lines(s).await, vec!["data: {}", ""]);
        m.assert();
    }

    #[tokio::test]
    async fn edge_backend_without_token_fails_before_network() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });
        let backend = EdgeFunctionBackend::new(HttpClient::new_default().unwrap(), server.base_url(), None);
        let err = match backend
            .open_stream(GeneratorKind::Essay, &json!({}), &RequestCtx::default())
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected unauthenticated"),
        };
        assert!(matches!(err, StudyGenError::Unauthenticated(_)));
        m.assert_hits(0);
    }

    #[test]
    fn url_for_joins_function_name() {
        let backend = EdgeFunctionBackend::new(HttpClient::new_default().unwrap(), "https://x/fn/".into(), None);
        assert_eq!(backend.url_for(GeneratorKind::MindMap), "https://x/fn/generate-mind-map");
    }

    #[tokio::test]
    async fn replay_output_does_not_depend_on_chunk_size() {
        let transcript = "data: {\"a\":1}\r\n\r\ndata: {\"b\":\"é\"}\n";
        let whole = lines(
            ReplayBackend::new(transcript)
                .open_stream(GeneratorKind::Notes, &json!({}), &RequestCtx::default())
                .await
                .unwrap(),
        )
        .await;
        for n in [0, 1, 2, 3, 7] {
            let got = lines(
                ReplayBackend::new(transcript)
                    .with_chunk_size(n)
                    .open_stream(GeneratorKind::Notes, &json!({}), &RequestCtx::default())
                    .await
                    .unwrap(),
            )
            .await;
            assert_eq!(got, whole, "chunk size {n}");
        }
        assert_eq!(whole, vec!["data: {\"a\":1}", "", "data: {\"b\":\"é\"}"]);
    }

    #[tokio::test]
    async fn replay_from_path_reads_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"data: x\nunterminated").unwrap();
        let backend = ReplayBackend::from_path(f.path()).unwrap().with_flush_tail(false);
        let got = lines(
            backend
                .open_stream(GeneratorKind::Notes, &json!({}), &RequestCtx::default())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(got, vec!["data: x"]);
    }
}
