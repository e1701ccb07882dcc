use thiserror::Error;

/// Core error type for studygen.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum StudyGenError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("rate limited by generation endpoint")]
    RateLimited { retry_after: Option<u64> },

    #[error("generation credits exhausted")]
    QuotaExhausted,

    #[error("generation endpoint unavailable: {endpoint}")]
    ProviderUnavailable { endpoint: String },

    #[error("upstream error: {code} {message}")]
    ProviderError { code: String, message: String },

    #[error("stream idle for more than {idle_ms}ms")]
    StreamIdleTimeout { idle_ms: u64 },

    #[error("generation cancelled")]
    Cancelled,

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a failure, cheap to copy into progress snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    RateLimited,
    QuotaExhausted,
    Transport,
    Upstream,
    Timeout,
    Cancelled,
    Persistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthenticated => "unauthenticated",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::Transport => "transport",
            Self::Upstream => "upstream",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Persistence => "persistence",
            Self::Internal => "internal",
        }
    }
}

impl StudyGenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::QuotaExhausted => ErrorKind::QuotaExhausted,
            Self::ProviderUnavailable { .. } => ErrorKind::Transport,
            Self::ProviderError { .. } => ErrorKind::Upstream,
            Self::StreamIdleTimeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Text suitable for a transient user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { retry_after: Some(secs) } => {
                format!("Rate limit exceeded. Please try again in {secs} seconds.")
            }
            Self::RateLimited { retry_after: None } => {
                "Rate limit exceeded. Please try again later.".to_string()
            }
            Self::QuotaExhausted => {
                "AI credits exhausted. Please add credits to continue generating.".to_string()
            }
            Self::Unauthenticated(_) => "Please sign in to generate content.".to_string(),
            Self::Validation(msg) => format!("Invalid request: {msg}"),
            Self::Cancelled => "Generation stopped.".to_string(),
            Self::StreamIdleTimeout { .. } => {
                "The generator stopped responding. Please try again.".to_string()
            }
            Self::Persistence(_) => "Failed to save. Please try again.".to_string(),
            other => format!("Failed to generate content: {other}"),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, StudyGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_quota_messages_differ() {
        let rl = StudyGenError::RateLimited { retry_after: None }.user_message();
        let q = StudyGenError::QuotaExhausted.user_message();
        assert!(rl.to_lowercase().contains("rate limit"));
        assert!(q.to_lowercase().contains("credits"));
        assert_ne!(rl, q);
    }

    #[test]
    fn retry_after_is_mentioned() {
        let msg = StudyGenError::RateLimited { retry_after: Some(7) }.user_message();
        assert!(msg.contains("7 seconds"));
    }

    #[test]
    fn kinds_classify_transport_and_upstream() {
        let t = StudyGenError::ProviderUnavailable { endpoint: "http".into() };
        assert_eq!(t.kind(), ErrorKind::Transport);
        let u = StudyGenError::ProviderError { code: "400".into(), message: "bad".into() };
        assert_eq!(u.kind(), ErrorKind::Upstream);
        assert_eq!(u.kind().as_str(), "upstream");
        assert!(u.user_message().contains("bad"));
    }
}
