use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{GeneratedMaterial, MaterialStore, NewMaterial, sort_newest_first};
use crate::error::{CoreResult, StudyGenError};

/// All materials in one JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CoreResult<Vec<GeneratedMaterial>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| persistence(&self.path, e))
    }

    async fn write_all(&self, items: Vec<GeneratedMaterial>) -> CoreResult<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &items))
            .await
            .map_err(|e| StudyGenError::Persistence(format!("writer task failed: {e}")))?
    }
}

fn replace_file(path: &Path, items: &[GeneratedMaterial]) -> CoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| persistence(path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persistence(path, e))?;
    let body = serde_json::to_vec_pretty(items).map_err(|e| persistence(path, e))?;
    tmp.write_all(&body).map_err(|e| persistence(path, e))?;
    tmp.as_file().sync_all().map_err(|e| persistence(path, e))?;
    tmp.persist(path).map_err(|e| persistence(path, e.error))?;
    debug!(path = %path.display(), count = items.len(), "materials file replaced");
    Ok(())
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> StudyGenError {
    StudyGenError::Persistence(format!("{}: {e}", path.display()))
}

#[async_trait]
impl MaterialStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn insert(&self, material: NewMaterial) -> CoreResult<GeneratedMaterial> {
        material.validate()?;
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let rec = material.into_record(Uuid::new_v4(), Utc::now());
        items.push(rec.clone());
        self.write_all(items).await?;
        Ok(rec)
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<GeneratedMaterial>> {
        let _guard = self.lock.lock().await;
        let mut out: Vec<_> = self
            .load()
            .await?
            .into_iter()
            .filter(|m| m.user_id == user_id)
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> CoreResult<Option<GeneratedMaterial>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|m| m.id == id && m.user_id == user_id))
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> CoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|m| !(m.id == id && m.user_id == user_id));
        if items.len() == before {
            return Ok(false);
        }
        self.write_all(items).await?;
        Ok(true)
    }
}
