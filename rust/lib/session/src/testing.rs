//! In-memory collaborators for tests.
//!
//! [`MemoryAuthProvider`] behaves like the hosted auth service closely
//! enough to drive the whole lifecycle: it keeps accounts, issues tokens,
//! broadcasts auth events and returns the service's own error texts.
//! [`MemoryProfileStore`] stands in for the `profiles` table.
//!
//! Both expose knobs to simulate outages, latency, and remote expiry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use crate::identity::{ProfilePatch, ProfileRecord, Role};
use crate::provider::{
    AuthEvent, AuthProvider, AuthStateChange, ProfileStore, ProviderError, ProviderSession,
    ProviderUser, SignUpResult,
};

const SESSION_TTL_SECS: i64 = 3600;

fn offline() -> ProviderError {
    ProviderError::Network("fetch failed".to_string())
}

fn rejected(status: u16, message: &str) -> ProviderError {
    ProviderError::Rejected {
        status,
        message: message.to_string(),
    }
}

// ── MemoryAuthProvider ──────────────────────────────────────────────

struct Account {
    password: String,
    user: ProviderUser,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, Account>,
    session: Option<ProviderSession>,
    next_id: u64,
    offline: bool,
    require_confirmation: bool,
    fail_metadata_updates: bool,
    latency: Option<Duration>,
}

impl AuthState {
    fn issue(&mut self, user: ProviderUser) -> ProviderSession {
        self.next_id += 1;
        ProviderSession {
            access_token: format!("access-{}", self.next_id),
            refresh_token: format!("refresh-{}", self.next_id),
            expires_at: Some(Utc::now().timestamp() + SESSION_TTL_SECS),
            user,
        }
    }

    fn account_by_id(&mut self, id: &str) -> Option<&mut Account> {
        self.accounts.values_mut().find(|a| a.user.id == id)
    }
}

pub struct MemoryAuthProvider {
    state: Mutex<AuthState>,
    events: broadcast::Sender<AuthStateChange>,
}

impl Default for MemoryAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(AuthState::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, event: AuthEvent, session: Option<ProviderSession>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthStateChange { event, session });
    }

    /// Apply latency, then fail if offline.
    async fn round_trip(&self) -> Result<(), ProviderError> {
        let latency = self.state().latency;
        if let Some(latency) = latency.filter(|l| !l.is_zero()) {
            tokio::time::sleep(latency).await;
        }
        if self.state().offline {
            return Err(offline());
        }
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Sign-ups return no session until the address is confirmed.
    pub fn require_confirmation(&self, on: bool) {
        self.state().require_confirmation = on;
    }

    pub fn fail_metadata_updates(&self, on: bool) {
        self.state().fail_metadata_updates = on;
    }

    /// Server-side role change for the account registered under `email`.
    pub fn set_app_role(&self, email: &str, role: Role) {
        let mut state = self.state();
        let Some(account) = state.accounts.get_mut(email) else {
            return;
        };
        account
            .user
            .app_metadata
            .insert("role".to_string(), json!(role.as_str()));
        let user = account.user.clone();
        if let Some(session) = state.session.as_mut().filter(|s| s.user.id == user.id) {
            session.user = user;
        }
    }

    /// The session ends remotely and SIGNED_OUT is broadcast.
    pub fn expire_session(&self) {
        let ended = self.state().session.take();
        if ended.is_some() {
            self.broadcast(AuthEvent::SignedOut, None);
        }
    }

    /// The session ends remotely without any event, as when the refresh
    /// token was revoked while the client was away.
    pub fn drop_session_silently(&self) {
        self.state().session = None;
    }

    /// Rotate the current tokens and broadcast TOKEN_REFRESHED.
    pub fn refresh_token(&self) -> Option<String> {
        let refreshed = {
            let mut state = self.state();
            let user = state.session.as_ref()?.user.clone();
            let session = state.issue(user);
            state.session = Some(session.clone());
            session
        };
        let token = refreshed.access_token.clone();
        self.broadcast(AuthEvent::TokenRefreshed, Some(refreshed));
        Some(token)
    }

    /// Broadcast `event` with the current session attached.
    pub fn emit(&self, event: AuthEvent) {
        let session = self.state().session.clone();
        self.broadcast(event, session);
    }

    pub fn current_session(&self) -> Option<ProviderSession> {
        self.state().session.clone()
    }

    pub fn current_access_token(&self) -> Option<String> {
        self.state().session.as_ref().map(|s| s.access_token.clone())
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<SignUpResult, ProviderError> {
        self.round_trip().await?;
        if !email.contains('@') {
            return Err(rejected(400, "Unable to validate email address: invalid format"));
        }
        if password.len() < 6 {
            return Err(rejected(422, "Password should be at least 6 characters."));
        }

        let (user, session) = {
            let mut state = self.state();
            if state.accounts.contains_key(email) {
                return Err(rejected(422, "User already registered"));
            }
            state.next_id += 1;
            let mut user = ProviderUser::new(format!("user-{}", state.next_id), email);
            user.user_metadata = match metadata {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            user.app_metadata.insert("role".to_string(), json!("user"));
            user.created_at = Some(Utc::now());
            state.accounts.insert(
                email.to_string(),
                Account {
                    password: password.to_string(),
                    user: user.clone(),
                },
            );

            let session = if state.require_confirmation {
                None
            } else {
                let session = state.issue(user.clone());
                state.session = Some(session.clone());
                Some(session)
            };
            (user, session)
        };

        if let Some(session) = &session {
            self.broadcast(AuthEvent::SignedIn, Some(session.clone()));
        }
        Ok(SignUpResult { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        self.round_trip().await?;
        let session = {
            let mut state = self.state();
            let user = match state.accounts.get(email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(rejected(400, "Invalid login credentials")),
            };
            let session = state.issue(user);
            state.session = Some(session.clone());
            session
        };
        self.broadcast(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.round_trip().await?;
        let ended = self.state().session.take();
        if ended.is_some() {
            self.broadcast(AuthEvent::SignedOut, None);
        }
        Ok(())
    }

    async fn sign_out_local(&self) -> Result<(), ProviderError> {
        let ended = self.state().session.take();
        if ended.is_some() {
            self.broadcast(AuthEvent::SignedOut, None);
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        self.round_trip().await?;
        Ok(self.state().session.clone())
    }

    async fn get_user(&self) -> Result<Option<ProviderUser>, ProviderError> {
        self.round_trip().await?;
        Ok(self.state().session.as_ref().map(|s| s.user.clone()))
    }

    async fn update_user_metadata(&self, fields: Value) -> Result<ProviderUser, ProviderError> {
        self.round_trip().await?;
        let session = {
            let mut state = self.state();
            if state.fail_metadata_updates {
                return Err(rejected(500, "Database error updating user"));
            }
            let Some(id) = state.session.as_ref().map(|s| s.user.id.clone()) else {
                return Err(rejected(401, "Auth session missing!"));
            };
            let Some(account) = state.account_by_id(&id) else {
                return Err(rejected(404, "User not found"));
            };
            if let Value::Object(map) = fields {
                account.user.user_metadata.extend(map);
            }
            let user = account.user.clone();
            state.session.as_mut().map(|s| {
                s.user = user;
                s.clone()
            })
        };
        let user = session.as_ref().map(|s| s.user.clone());
        self.broadcast(AuthEvent::UserUpdated, session);
        user.ok_or_else(|| rejected(401, "Auth session missing!"))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.events.subscribe()
    }
}

// ── MemoryProfileStore ──────────────────────────────────────────────

#[derive(Default)]
struct ProfileState {
    rows: HashMap<String, ProfileRecord>,
    offline: bool,
    fail_inserts: bool,
    fail_updates: bool,
}

#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<ProfileState>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProfileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn fail_inserts(&self, on: bool) {
        self.state().fail_inserts = on;
    }

    pub fn fail_updates(&self, on: bool) {
        self.state().fail_updates = on;
    }

    /// Administrative role change, as done from the dashboard.
    pub fn set_role(&self, id: &str, role: Role) {
        if let Some(row) = self.state().rows.get_mut(id) {
            row.role = Some(role);
        }
    }

    pub fn get(&self, id: &str) -> Option<ProfileRecord> {
        self.state().rows.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().rows.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn insert(&self, row: &ProfileRecord) -> Result<ProfileRecord, ProviderError> {
        let mut state = self.state();
        if state.offline {
            return Err(offline());
        }
        if state.fail_inserts {
            return Err(rejected(
                403,
                "new row violates row-level security policy for table \"profiles\"",
            ));
        }
        if state.rows.contains_key(&row.id) {
            return Err(rejected(
                409,
                "duplicate key value violates unique constraint \"profiles_pkey\"",
            ));
        }
        let mut saved = row.clone();
        let now = Utc::now();
        saved.created_at = Some(now);
        saved.updated_at = Some(now);
        state.rows.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<ProfileRecord>, ProviderError> {
        let state = self.state();
        if state.offline {
            return Err(offline());
        }
        Ok(state.rows.get(id).cloned())
    }

    async fn update_by_id(
        &self,
        id: &str,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, ProviderError> {
        let mut state = self.state();
        if state.offline {
            return Err(offline());
        }
        if state.fail_updates {
            return Err(rejected(500, "Database error updating profile"));
        }
        let Some(row) = state.rows.get_mut(id) else {
            return Err(rejected(404, "No user found"));
        };
        row.full_name = Some(patch.full_name.clone());
        if let Some(avatar) = &patch.avatar_url {
            row.avatar_url = Some(avatar.clone());
        }
        row.updated_at = Some(Utc::now());
        Ok(row.clone())
    }
}
