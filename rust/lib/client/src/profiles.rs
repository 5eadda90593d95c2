//! `profiles` table over the backend's REST endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use storefront_session::{ProfilePatch, ProfileRecord, ProfileStore, ProviderError};

use crate::config::BackendConfig;
use crate::error::ApiError;
use crate::token::TokenSource;

const TABLE: &str = "profiles";

/// CRUD client for the `profiles` table.
///
/// Rows come back as arrays; `Prefer: return=representation` makes writes
/// return the stored row.
pub struct PostgrestProfiles {
    http: reqwest::Client,
    backend: BackendConfig,
    token_source: Arc<dyn TokenSource>,
}

impl PostgrestProfiles {
    pub fn new(backend: BackendConfig, token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            backend,
            token_source,
        }
    }

    /// Build a request with the key and auth headers.
    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        let token = self.token_source.token().await?;
        Ok(builder
            .header("apikey", self.backend.anon_key.as_str())
            .bearer_auth(token.as_deref().unwrap_or(self.backend.anon_key.as_str())))
    }

    async fn parse<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_body(status.as_u16(), &body));
        }
        resp.json::<R>()
            .await
            .map_err(|e| ApiError::Decode(format!("response body: {}", e)))
    }

    fn id_filter(id: &str) -> [(&'static str, String); 1] {
        [("id", format!("eq.{}", id))]
    }
}

#[async_trait]
impl ProfileStore for PostgrestProfiles {
    async fn insert(&self, row: &ProfileRecord) -> Result<ProfileRecord, ProviderError> {
        let req = self
            .http
            .post(self.backend.rest_url(TABLE))
            .header("Prefer", "return=representation")
            .json(row);
        let resp = self.authed(req).await?.send().await.map_err(ApiError::from)?;
        let rows: Vec<ProfileRecord> = Self::parse(resp).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ApiError::Decode("insert returned no row".to_string()).into())
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<ProfileRecord>, ProviderError> {
        let req = self
            .http
            .get(self.backend.rest_url(TABLE))
            .query(&Self::id_filter(id))
            .query(&[("select", "*")]);
        let resp = self.authed(req).await?.send().await.map_err(ApiError::from)?;
        let rows: Vec<ProfileRecord> = Self::parse(resp).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_by_id(
        &self,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, ProviderError> {
        let mut body = serde_json::to_value(patch)
            .map_err(|e| ApiError::Decode(format!("profile patch: {}", e)))?;
        body["updated_at"] = json!(Utc::now());

        let req = self
            .http
            .patch(self.backend.rest_url(TABLE))
            .query(&Self::id_filter(id))
            .header("Prefer", "return=representation")
            .json(&body);
        let resp = self.authed(req).await?.send().await.map_err(ApiError::from)?;
        let rows: Vec<ProfileRecord> = Self::parse(resp).await?;
        // Row-level security hides rows the caller may not touch, so
        // "not yours" and "missing" look the same.
        rows.into_iter().next().ok_or_else(|| ProviderError::Rejected {
            status: 404,
            message: "No user found".to_string(),
        })
    }
}
