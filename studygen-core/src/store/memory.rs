use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GeneratedMaterial, MaterialStore, NewMaterial, sort_newest_first};
use crate::error::CoreResult;

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<Vec<GeneratedMaterial>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl MaterialStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, material: NewMaterial) -> CoreResult<GeneratedMaterial> {
        material.validate()?;
        let rec = material.into_record(Uuid::new_v4(), Utc::now());
        self.items.write().await.push(rec.clone());
        Ok(rec)
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<GeneratedMaterial>> {
        let mut out: Vec<_> = self
            .items
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> CoreResult<Option<GeneratedMaterial>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .find(|m| m.id == id && m.user_id == user_id)
            .cloned())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> CoreResult<bool> {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|m| !(m.id == id && m.user_id == user_id));
        Ok(items.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new(user: &str, title: &str) -> NewMaterial {
        NewMaterial {
            user_id: user.into(),
            kind: "notes".into(),
            title: title.into(),
            content: json!({"content": title}),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn lists_newest_first_per_user() {
        let store = MemoryStore::new();
        store.insert(new("u1", "first")).await.unwrap();
        store.insert(new("u2", "other")).await.unwrap();
        store.insert(new("u1", "second")).await.unwrap();
        let titles: Vec<_> = store
            .list_for_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn get_and_delete_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let rec = store.insert(new("u1", "mine")).await.unwrap();
        assert!(store.get("u2", rec.id).await.unwrap().is_none());
        assert!(!store.delete("u2", rec.id).await.unwrap());
        assert_eq!(store.get("u1", rec.id).await.unwrap().unwrap().title, "mine");
        assert!(store.delete("u1", rec.id).await.unwrap());
        assert!(!store.delete("u1", rec.id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn insert_validates() {
        let store = MemoryStore::new();
        assert!(store.insert(new("", "x")).await.is_err());
        assert!(store.is_empty().await);
    }
}
