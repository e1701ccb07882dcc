//! Persistence of finished study materials.

pub mod file;
pub mod memory;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::error::{CoreResult, StudyGenError};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use rest::RestStore;

/// A material about to be saved. The store assigns `id` and `created_at`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewMaterial {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NewMaterial {
    pub fn validate(&self) -> CoreResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(StudyGenError::Validation("user id must not be empty".into()));
        }
        if self.kind.trim().is_empty() {
            return Err(StudyGenError::Validation("material type must not be empty".into()));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> GeneratedMaterial {
        GeneratedMaterial {
            id,
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            content: self.content,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedMaterial {
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MaterialStore: Send + Sync {
    fn name(&self) -> &str;
    async fn insert(&self, material: NewMaterial) -> CoreResult<GeneratedMaterial>;
    /// Materials owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<GeneratedMaterial>>;
    async fn get(&self, user_id: &str, id: Uuid) -> CoreResult<Option<GeneratedMaterial>>;
    /// Returns false when no material with that id belongs to the user.
    async fn delete(&self, user_id: &str, id: Uuid) -> CoreResult<bool>;
}

/// Newest first; equal timestamps keep most recent insertion first.
pub(crate) fn sort_newest_first(items: &mut [GeneratedMaterial]) {
    items.reverse();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Builds the store selected by `cfg.store.backend`.
pub fn from_config(cfg: &Config) -> CoreResult<Arc<dyn MaterialStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            let path = cfg
                .store
                .path
                .as_deref()
                .ok_or_else(|| StudyGenError::Validation("store.path is required for the file backend".into()))?;
            Ok(Arc::new(FileStore::new(path)))
        }
        StoreBackend::Rest => {
            let url = cfg
                .store
                .rest_url
                .clone()
                .ok_or_else(|| StudyGenError::Validation("store.rest_url is required for the rest backend".into()))?;
            let key_env = cfg.store.api_key_env.as_deref().unwrap_or("STUDYGEN_API_KEY");
            let api_key = std::env::var(key_env)
                .map_err(|_| StudyGenError::Validation(format!("environment variable {key_env} is not set")))?;
            let token = std::env::var(&cfg.endpoint.token_env)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(SecretString::from);
            let http = crate::http_client::HttpClient::new(&cfg.http)?;
            Ok(Arc::new(RestStore::new(http, url, SecretString::from(api_key), token)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serializes_kind_as_type() {
        let rec = NewMaterial {
            user_id: "u".into(),
            kind: "mcqs".into(),
            title: "t".into(),
            content: json!({"mcqs": []}),
            metadata: None,
        }
        .into_record(Uuid::nil(), DateTime::from_timestamp(0, 0).unwrap());
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["type"], "mcqs");
        assert_eq!(v["created_at"], "1970-01-01T00:00:00Z");
        let back: GeneratedMaterial = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn validate_rejects_blank_owner() {
        let m = NewMaterial {
            user_id: " ".into(),
            kind: "essay".into(),
            title: "t".into(),
            content: json!({}),
            metadata: None,
        };
        assert!(matches!(m.validate(), Err(StudyGenError::Validation(_))));
    }

    #[test]
    fn from_config_requires_backend_settings() {
        let mut cfg = Config::with_endpoint("http://x");
        assert_eq!(from_config(&cfg).unwrap().name(), "memory");
        cfg.store.backend = StoreBackend::File;
        assert!(from_config(&cfg).is_err());
        cfg.store.path = Some("/tmp/studygen-materials.json".into());
        assert_eq!(from_config(&cfg).unwrap().name(), "file");
        cfg.store.backend = StoreBackend::Rest;
        assert!(from_config(&cfg).is_err());
    }
}
