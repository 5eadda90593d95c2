//! Collaborator contracts: the hosted auth provider and the profile table.
//!
//! Both are remote services; implementations live outside this crate
//! (`storefront-client` over HTTP, [`crate::testing`] in memory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::identity::{ProfilePatch, ProfileRecord};

/// What a collaborator call can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The service answered and said no.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("network: {0}")]
    Network(String),

    #[error("decode: {0}")]
    Decode(String),
}

/// Baseline identity claims as the auth provider reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// User-editable metadata (display name, avatar).
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
    /// Server-controlled metadata (role).
    #[serde(default)]
    pub app_metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ProviderUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
            user_metadata: Map::new(),
            app_metadata: Map::new(),
            created_at: None,
        }
    }

    /// First non-empty string among the given user-metadata keys.
    pub fn user_meta_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.user_metadata.get(*k).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
    }

    pub fn app_meta_str(&self, key: &str) -> Option<&str> {
        self.app_metadata.get(key).and_then(Value::as_str)
    }
}

/// A live remote session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Absolute expiry, seconds since epoch.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: ProviderUser,
}

/// Result of `sign_up`. The session is absent when the provider requires
/// e-mail confirmation before the first sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResult {
    pub user: ProviderUser,
    pub session: Option<ProviderSession>,
}

/// Auth state events pushed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthStateChange {
    pub event: AuthEvent,
    pub session: Option<ProviderSession>,
}

/// The hosted authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUpResult, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// End the remote session. Succeeds when there is no session.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Forget the session on this device only: no network, the remote
    /// session is left to expire on its own. Emits `SIGNED_OUT` when a
    /// session was held.
    async fn sign_out_local(&self) -> Result<(), ProviderError>;

    /// The current session, refreshed if it is about to expire.
    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError>;

    /// Current user claims, verified by a round trip.
    async fn get_user(&self) -> Result<Option<ProviderUser>, ProviderError>;

    /// Merge `fields` into the user's metadata.
    async fn update_user_metadata(&self, fields: Value) -> Result<ProviderUser, ProviderError>;

    /// Subscribe to auth state events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange>;
}

/// The application-owned `profiles` table, keyed by user id.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    async fn insert(&self, row: &ProfileRecord) -> Result<ProfileRecord, ProviderError>;

    /// `Ok(None)` when the row does not exist yet.
    async fn select_by_id(&self, id: &str) -> Result<Option<ProfileRecord>, ProviderError>;

    /// Returns the updated row.
    async fn update_by_id(
        &self,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_deserializes_with_missing_metadata() {
        let user: ProviderUser =
            serde_json::from_str(r#"{"id":"u1","email":"a@x.com"}"#).unwrap();
        assert_eq!(user.id, "u1");
        assert!(user.user_metadata.is_empty());
        assert!(user.created_at.is_none());
    }

    #[test]
    fn user_meta_str_skips_blank_values() {
        let mut user = ProviderUser::new("u1", "a@x.com");
        user.user_metadata.insert("name".into(), Value::String("  ".into()));
        user.user_metadata.insert("full_name".into(), Value::String("Ann".into()));
        assert_eq!(user.user_meta_str(&["name", "full_name"]), Some("Ann"));
        assert_eq!(user.user_meta_str(&["avatar"]), None);
    }

    #[test]
    fn auth_event_wire_names() {
        assert_eq!(
            serde_json::to_string(&AuthEvent::TokenRefreshed).unwrap(),
            "\"TOKEN_REFRESHED\""
        );
        let ev: AuthEvent = serde_json::from_str("\"SIGNED_OUT\"").unwrap();
        assert_eq!(ev, AuthEvent::SignedOut);
    }
}
