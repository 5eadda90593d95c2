//! Auth provider over the hosted backend's `/auth/v1` endpoints.
//!
//! The session (both tokens plus user claims) is cached in memory and
//! persisted under [`SESSION_KEY`] so the next process starts signed in.
//! Tokens are refreshed on demand once they are within
//! [`REFRESH_MARGIN_SECS`] of expiry; [`crate::AutoRefresh`] does the same
//! on a timer. A refresh the backend rejects ends the session and emits
//! `SIGNED_OUT`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use storefront_kv::KVStore;
use storefront_session::{
    AuthEvent, AuthProvider, AuthStateChange, ProviderError, ProviderSession, ProviderUser,
    SignUpResult,
};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::ApiError;
use crate::token::TokenSource;

/// KV key holding the serialized provider session.
pub const SESSION_KEY: &str = "sb-session";

/// Refresh this many seconds before the access token expires.
pub const REFRESH_MARGIN_SECS: i64 = 30;

const EVENT_CAPACITY: usize = 32;

/// Token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: ProviderUser,
}

impl TokenResponse {
    fn into_session(self) -> ProviderSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        ProviderSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

fn needs_refresh(session: &ProviderSession, margin_secs: i64) -> bool {
    session
        .expires_at
        .is_some_and(|at| Utc::now().timestamp() + margin_secs >= at)
}

pub struct SupabaseAuth {
    http: reqwest::Client,
    backend: BackendConfig,
    kv: Arc<dyn KVStore>,
    cached: RwLock<Option<ProviderSession>>,
    events: broadcast::Sender<AuthStateChange>,
}

impl SupabaseAuth {
    /// Create the provider, resuming any session persisted in `kv`.
    ///
    /// An unreadable persisted session is discarded.
    pub fn new(backend: BackendConfig, kv: Arc<dyn KVStore>) -> Self {
        let restored = match kv.get(SESSION_KEY) {
            Ok(Some(raw)) => match serde_json::from_slice::<ProviderSession>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "persisted auth session unreadable, discarding");
                    if let Err(e) = kv.delete(SESSION_KEY) {
                        warn!(error = %e, "could not discard persisted auth session");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "persisted auth session unavailable");
                None
            }
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            http: reqwest::Client::new(),
            backend,
            kv,
            cached: RwLock::new(restored),
            events,
        }
    }

    // ── Plumbing ────────────────────────────────────────────────────

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        bearer: Option<&str>,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.backend.auth_url(path))
            .header("apikey", self.backend.anon_key.as_str())
            .bearer_auth(bearer.unwrap_or(self.backend.anon_key.as_str()))
    }

    async fn parse<R: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<R, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_body(status.as_u16(), &body));
        }
        resp.json::<R>()
            .await
            .map_err(|e| ApiError::Decode(format!("response body: {}", e)))
    }

    fn persist(&self, session: Option<&ProviderSession>) {
        let result = match session {
            Some(s) => match serde_json::to_vec(s) {
                Ok(raw) => self.kv.set(SESSION_KEY, &raw),
                Err(e) => {
                    warn!(error = %e, "could not serialize auth session");
                    return;
                }
            },
            None => self.kv.delete(SESSION_KEY),
        };
        if let Err(e) = result {
            warn!(error = %e, "could not persist auth session");
        }
    }

    fn emit(&self, event: AuthEvent, session: Option<ProviderSession>) {
        debug!(?event, "auth event");
        // No subscribers is fine.
        let _ = self.events.send(AuthStateChange { event, session });
    }

    async fn replace(&self, session: Option<ProviderSession>, event: AuthEvent) {
        *self.cached.write().await = session.clone();
        self.persist(session.as_ref());
        self.emit(event, session);
    }

    async fn refresh(&self, refresh_token: &str) -> Result<ProviderSession, ApiError> {
        let resp = self
            .request(reqwest::Method::POST, "token", None)
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let tokens: TokenResponse = Self::parse(resp).await?;
        Ok(tokens.into_session())
    }

    /// Current session, refreshed first if it expires within `margin_secs`.
    ///
    /// A rejected refresh ends the session (`Ok(None)` plus `SIGNED_OUT`);
    /// a network failure leaves it in place and returns the error.
    pub async fn session_within(&self, margin_secs: i64) -> Result<Option<ProviderSession>, ApiError> {
        // Fast path: read lock, check cache.
        {
            let guard = self.cached.read().await;
            match guard.as_ref() {
                None => return Ok(None),
                Some(s) if !needs_refresh(s, margin_secs) => return Ok(Some(s.clone())),
                Some(_) => {}
            }
        }

        // Slow path: write lock, re-check, refresh.
        let mut guard = self.cached.write().await;
        let refresh_token = match guard.as_ref() {
            None => return Ok(None),
            Some(s) if !needs_refresh(s, margin_secs) => return Ok(Some(s.clone())),
            Some(s) => s.refresh_token.clone(),
        };

        match self.refresh(&refresh_token).await {
            Ok(fresh) => {
                *guard = Some(fresh.clone());
                drop(guard);
                self.persist(Some(&fresh));
                info!(user_id = %fresh.user.id, "access token refreshed");
                self.emit(AuthEvent::TokenRefreshed, Some(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(ApiError::Server { status, message }) if (400..500).contains(&status) => {
                *guard = None;
                drop(guard);
                self.persist(None);
                warn!(status, %message, "refresh rejected, session ended");
                self.emit(AuthEvent::SignedOut, None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn access_token(&self) -> Result<Option<String>, ApiError> {
        Ok(self
            .session_within(REFRESH_MARGIN_SECS)
            .await?
            .map(|s| s.access_token))
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUpResult, ProviderError> {
        let resp = self
            .request(reqwest::Method::POST, "signup", None)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .map_err(ApiError::from)?;
        let body: Value = Self::parse(resp).await?;

        // With e-mail confirmation on, the body is the bare user.
        if body.get("access_token").is_some() {
            let tokens: TokenResponse = serde_json::from_value(body)
                .map_err(|e| ApiError::Decode(format!("signup session: {}", e)))?;
            let session = tokens.into_session();
            let user = session.user.clone();
            self.replace(Some(session.clone()), AuthEvent::SignedIn).await;
            Ok(SignUpResult { user, session: Some(session) })
        } else {
            let user: ProviderUser = serde_json::from_value(body.get("user").cloned().unwrap_or(body))
                .map_err(|e| ApiError::Decode(format!("signup user: {}", e)))?;
            debug!(user_id = %user.id, "sign-up awaiting confirmation");
            Ok(SignUpResult { user, session: None })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let resp = self
            .request(reqwest::Method::POST, "token", None)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(ApiError::from)?;
        let tokens: TokenResponse = Self::parse(resp).await?;
        let session = tokens.into_session();
        self.replace(Some(session.clone()), AuthEvent::SignedIn).await;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(token) = self.cached.read().await.as_ref().map(|s| s.access_token.clone()) else {
            return Ok(());
        };

        let resp = self
            .request(reqwest::Method::POST, "logout", Some(&token))
            .send()
            .await
            .map_err(ApiError::from)?;
        let status = resp.status().as_u16();
        // Already invalid remotely: the local session still has to go.
        if !resp.status().is_success() && !matches!(status, 401 | 403 | 404) {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_body(status, &body).into());
        }

        self.replace(None, AuthEvent::SignedOut).await;
        Ok(())
    }

    async fn sign_out_local(&self) -> Result<(), ProviderError> {
        if self.cached.read().await.is_none() {
            return Ok(());
        }
        self.replace(None, AuthEvent::SignedOut).await;
        info!("auth session discarded locally");
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        Ok(self.session_within(REFRESH_MARGIN_SECS).await?)
    }

    async fn get_user(&self) -> Result<Option<ProviderUser>, ProviderError> {
        let Some(token) = self.access_token().await? else {
            return Ok(None);
        };
        let resp = self
            .request(reqwest::Method::GET, "user", Some(&token))
            .send()
            .await
            .map_err(ApiError::from)?;
        match Self::parse::<ProviderUser>(resp).await {
            Ok(user) => Ok(Some(user)),
            Err(ApiError::Server { status: 401 | 403, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_user_metadata(&self, fields: Value) -> Result<ProviderUser, ProviderError> {
        let Some(token) = self.access_token().await? else {
            return Err(ApiError::Auth("Auth session missing!".to_string()).into());
        };
        let resp = self
            .request(reqwest::Method::PUT, "user", Some(&token))
            .json(&json!({ "data": fields }))
            .send()
            .await
            .map_err(ApiError::from)?;
        let user: ProviderUser = Self::parse(resp).await?;

        let session = {
            let mut guard = self.cached.write().await;
            if let Some(s) = guard.as_mut() {
                s.user = user.clone();
            }
            guard.clone()
        };
        self.persist(session.as_ref());
        self.emit(AuthEvent::UserUpdated, session);
        Ok(user)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl TokenSource for SupabaseAuth {
    async fn token(&self) -> Result<Option<String>, ApiError> {
        self.access_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: Option<i64>) -> ProviderSession {
        ProviderSession {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at,
            user: ProviderUser::new("u1", "a@x.com"),
        }
    }

    #[test]
    fn refresh_margin() {
        let now = Utc::now().timestamp();
        assert!(!needs_refresh(&session(None), REFRESH_MARGIN_SECS));
        assert!(!needs_refresh(&session(Some(now + 3600)), REFRESH_MARGIN_SECS));
        assert!(needs_refresh(&session(Some(now + 10)), REFRESH_MARGIN_SECS));
        assert!(needs_refresh(&session(Some(now - 10)), REFRESH_MARGIN_SECS));
    }

    #[test]
    fn token_response_computes_expiry() {
        let tokens: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "u1", "email": "a@x.com" }
        }))
        .unwrap();
        let s = tokens.into_session();
        let at = s.expires_at.unwrap();
        assert!((at - Utc::now().timestamp() - 3600).abs() <= 1);
    }

    #[tokio::test]
    async fn local_sign_out_forgets_persisted_session() {
        let kv = Arc::new(storefront_kv::MemoryStore::new());
        let persisted = session(Some(Utc::now().timestamp() + 3600));
        kv.set(SESSION_KEY, &serde_json::to_vec(&persisted).unwrap()).unwrap();
        // Nothing listens on port 9: the call must not need the network.
        let auth = SupabaseAuth::new(BackendConfig::new("http://127.0.0.1:9", "k"), kv.clone());
        let mut events = auth.subscribe();
        assert_eq!(auth.get_session().await.unwrap(), Some(persisted));

        auth.sign_out_local().await.unwrap();
        assert_eq!(auth.get_session().await.unwrap(), None);
        assert!(kv.is_empty());
        assert_eq!(events.recv().await.unwrap().event, AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn corrupt_persisted_session_is_dropped() {
        let kv = Arc::new(storefront_kv::MemoryStore::new());
        kv.set(SESSION_KEY, b"{broken").unwrap();
        let auth = SupabaseAuth::new(BackendConfig::new("http://127.0.0.1:9", "k"), kv.clone());
        assert_eq!(auth.get_session().await.unwrap(), None);
        assert!(kv.is_empty());
    }
}
