use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointCfg {
    /// Base URL of the generation functions, e.g. https://xyz.example.co/functions/v1
    pub functions_url: String,
    /// Name of the environment variable that contains the caller's bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "STUDYGEN_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 300000ms). Covers the whole stream.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// Longest wait for the next chunk before the generation fails.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Cap on JSON text buffered while waiting for a frame to complete.
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    /// Emit an unterminated final line at end of stream instead of discarding it.
    #[serde(default = "default_flush_trailing_line")]
    pub flush_trailing_line: bool,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            max_pending_bytes: default_max_pending_bytes(),
            flush_trailing_line: default_flush_trailing_line(),
        }
    }
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}
fn default_max_pending_bytes() -> usize {
    1 << 20
}
fn default_flush_trailing_line() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Rest,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StoreCfg {
    #[serde(default)]
    pub backend: StoreBackend,
    /// JSON file used by the `file` backend.
    #[serde(default)]
    pub path: Option<String>,
    /// Base URL of the hosted database REST API used by the `rest` backend.
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Name of the environment variable holding the database API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub endpoint: EndpointCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
    #[serde(default)]
    pub store: StoreCfg,
    /// Owner recorded on saved materials.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::StudyGenError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::StudyGenError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StudyGenError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::StudyGenError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StudyGenError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::StudyGenError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Config pointing at `functions_url` with every other section defaulted.
    pub fn with_endpoint(functions_url: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointCfg {
                functions_url: functions_url.into(),
                token_env: default_token_env(),
            },
            http: HttpCfg::default(),
            stream: StreamCfg::default(),
            store: StoreCfg::default(),
            user_id: None,
        }
    }
}
