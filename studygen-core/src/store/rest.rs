use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::{GeneratedMaterial, MaterialStore, NewMaterial};
use crate::error::{CoreResult, StudyGenError};
use crate::http_client::{HttpClient, RequestCtx};

const TABLE: &str = "generated_materials";

/// Materials table behind a PostgREST-style HTTP API.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: HttpClient,
    base: String,
    api_key: SecretString,
    /// Caller's session token. Falls back to the API key when absent.
    token: Option<SecretString>,
}

impl RestStore {
    pub fn new(http: HttpClient, base: String, api_key: SecretString, token: Option<SecretString>) -> Self {
        Self {
            http,
            base,
            api_key,
            token,
        }
    }

    fn url(&self, params: &[(&str, String)]) -> CoreResult<String> {
        let raw = format!("{}/{TABLE}", self.base.trim_end_matches('/'));
        let url = Url::parse_with_params(&raw, params)
            .map_err(|e| StudyGenError::Validation(format!("bad store url {raw}: {e}")))?;
        Ok(url.into())
    }

    fn auth(&self) -> (String, String) {
        let bearer = self.token.as_ref().unwrap_or(&self.api_key);
        (
            format!("Bearer {}", bearer.expose_secret()),
            self.api_key.expose_secret().to_string(),
        )
    }
}

fn persistence(e: StudyGenError) -> StudyGenError {
    match e {
        StudyGenError::Persistence(_) | StudyGenError::Validation(_) => e,
        other => StudyGenError::Persistence(other.to_string()),
    }
}

#[async_trait]
impl MaterialStore for RestStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn insert(&self, material: NewMaterial) -> CoreResult<GeneratedMaterial> {
        material.validate()?;
        let url = self.url(&[])?;
        let (bearer, key) = self.auth();
        let headers = [
            ("Authorization", bearer.as_str()),
            ("apikey", key.as_str()),
            ("Prefer", "return=representation"),
        ];
        let (rows, _, _): (Vec<GeneratedMaterial>, _, _) = self
            .http
            .post_json(&url, &material, &headers, &RequestCtx::default())
            .await
            .map_err(persistence)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StudyGenError::Persistence("insert returned no row".into()))
    }

    async fn list_for_user(&self, user_id: &str) -> CoreResult<Vec<GeneratedMaterial>> {
        let url = self.url(&[
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_string()),
        ])?;
        let (bearer, key) = self.auth();
        let headers = [("Authorization", bearer.as_str()), ("apikey", key.as_str())];
        let (rows, _, _) = self
            .http
            .get_json(&url, &headers, &RequestCtx::default())
            .await
            .map_err(persistence)?;
        Ok(rows)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> CoreResult<Option<GeneratedMaterial>> {
        let url = self.url(&[("user_id", format!("eq.{user_id}")), ("id", format!("eq.{id}"))])?;
        let (bearer, key) = self.auth();
        let headers = [("Authorization", bearer.as_str()), ("apikey", key.as_str())];
        let (rows, _, _): (Vec<GeneratedMaterial>, _, _) = self
            .http
            .get_json(&url, &headers, &RequestCtx::default())
            .await
            .map_err(persistence)?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> CoreResult<bool> {
        let url = self.url(&[("user_id", format!("eq.{user_id}")), ("id", format!("eq.{id}"))])?;
        let (bearer, key) = self.auth();
        let headers = [
            ("Authorization", bearer.as_str()),
            ("apikey", key.as_str()),
            ("Prefer", "return=representation"),
        ];
        let (rows, _, _): (Vec<GeneratedMaterial>, _, _) = self
            .http
            .delete_json(&url, &headers, &RequestCtx::default())
            .await
            .map_err(persistence)?;
        Ok(!rows.is_empty())
    }
}
