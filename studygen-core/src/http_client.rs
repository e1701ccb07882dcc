use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use encoding_rs::{CoderResult, Decoder, UTF_8};
use futures_util::stream::Stream;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::config::HttpCfg;
use crate::error::{CoreResult, StudyGenError};

/// Request context carries tracing IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// Represents a single Server-Sent-Event line (already split on `\n`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// A boxed stream of raw body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(max) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max);
        }
        let inner = builder
            .build()
            .map_err(|e| StudyGenError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "studygen/0.1".to_string(),
        })
    }

    fn decorate(&self, mut req: RequestBuilder, headers: &[(&str, &str)], ctx: &RequestCtx<'_>) -> RequestBuilder {
        req = req.header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let req = self.decorate(self.inner.post(url).json(body), headers, ctx);
        self.send_json(req).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let req = self.decorate(self.inner.get(url), headers, ctx);
        self.send_json(req).await
    }

    pub async fn delete_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, Option<String>, u32)> {
        let req = self.decorate(self.inner.delete(url), headers, ctx);
        self.send_json(req).await
    }

    async fn send_json<R: DeserializeOwned>(&self, req: RequestBuilder) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|_e| StudyGenError::ProviderUnavailable {
                endpoint: "http".into(),
            })?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let request_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error("http", status, ra, &text));
        }

        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| StudyGenError::ProviderError {
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })?;
        Ok((parsed, request_id, latency))
    }

    /// POST JSON and return an SSE (Server-Sent Events) line stream.
    /// Each yielded item is one line with its terminator removed.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
        flush_tail: bool,
    ) -> CoreResult<SseStream> {
        let req = self
            .decorate(self.inner.post(url).json(body), headers, ctx)
            .header("Accept", "text/event-stream");

        let resp = req.send().await.map_err(|_| StudyGenError::ProviderUnavailable {
            endpoint: "http".into(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error("http", status, ra, &body));
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            let body = resp.text().await.unwrap_or_default();
            return Err(StudyGenError::ProviderError {
                code: status.as_u16().to_string(),
                message: error_message_from_body(&body)
                    .unwrap_or_else(|| "expected an event stream, got JSON".to_string()),
            });
        }

        use futures_util::TryStreamExt;
        let byte_stream = resp
            .bytes_stream()
            .map_err(|_e| StudyGenError::ProviderUnavailable {
                endpoint: "http".into(),
            });
        Ok(Box::pin(LineStream::new(Box::pin(byte_stream), flush_tail)))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 4] = ["x-request-id", "request-id", "sb-request-id", "x-amzn-requestid"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

/// Pulls the message out of a `{ "error": "..." }` body.
fn error_message_from_body(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    match v.get("error")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o.get("message").and_then(|m| m.as_str()).map(str::to_string),
        _ => None,
    }
}

pub(crate) fn map_http_error(endpoint: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> StudyGenError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StudyGenError::RateLimited { retry_after },
        StatusCode::PAYMENT_REQUIRED => StudyGenError::QuotaExhausted,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            StudyGenError::ProviderUnavailable {
                endpoint: endpoint.to_string(),
            }
        }
        s => StudyGenError::ProviderError {
            code: s.as_u16().to_string(),
            message: truncate(&error_message_from_body(body).unwrap_or_else(|| body.to_string()), 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Line splitter over a bytes stream; yields `SseLine`s separated by '\n'.
///
/// Bytes go through a stateful UTF-8 decoder, so a character split across two
/// chunks is reassembled instead of being replaced. The trailing unterminated
/// fragment is either emitted or discarded at end of stream, per `flush_tail`.
pub struct LineStream {
    inner: ByteStream,
    decoder: Decoder,
    buf: String,
    flush_tail: bool,
    done: bool,
}

impl LineStream {
    pub fn new(inner: ByteStream, flush_tail: bool) -> Self {
        Self {
            inner,
            decoder: UTF_8.new_decoder_with_bom_removal(),
            buf: String::new(),
            flush_tail,
            done: false,
        }
    }

    fn decode(&mut self, mut src: &[u8], last: bool) {
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3).saturating_add(4));
            self.buf.reserve(needed);
            let (result, read, had_errors) = self.decoder.decode_to_string(src, &mut self.buf, last);
            if had_errors {
                debug!("replaced malformed utf-8 in event stream");
            }
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

fn strip_terminator(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
    }
    if line.ends_with('\r') {
        line.pop();
    }
    line
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // If we already have a newline in the buffer, split and yield immediately.
            if let Some(idx) = self.buf.find('\n') {
                let line = self.buf.drain(..=idx).collect::<String>();
                return Poll::Ready(Some(Ok(SseLine {
                    line: strip_terminator(line),
                })));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.decode(&chunk, false);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    self.buf.clear();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.decode(&[], true);
                    self.done = true;
                    if self.buf.contains('\n') {
                        continue;
                    }
                    if self.buf.is_empty() {
                        return Poll::Ready(None);
                    }
                    let tail = std::mem::take(&mut self.buf);
                    if self.flush_tail {
                        return Poll::Ready(Some(Ok(SseLine {
                            line: strip_terminator(tail),
                        })));
                    }
                    debug!(bytes = tail.len(), "discarding unterminated trailing line");
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn byte_chunks(chunks: Vec<Vec<u8>>) -> ByteStream {
    let items: Vec<CoreResult<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
    Box::pin(futures::stream::iter(items))
}
