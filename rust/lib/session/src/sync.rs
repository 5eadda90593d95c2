//! Session Synchronizer: every state-changing session operation, plus the
//! reconciliation of provider events into the [`SessionStore`].
//!
//! Reconciliation is sequential: resolve baseline claims, then enrich from
//! the profile row, then write the store, then notify listeners. A tokio
//! mutex serializes these steps between direct operations and the event
//! loop, so listeners always observe the identity the store holds.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::identity::{Identity, ProfilePatch, ProfileRecord, default_display_name, reconcile};
use crate::listeners::{ChangeReason, Listeners, SessionChange, Subscription};
use crate::messages::{Locale, Messages};
use crate::notify::{NotificationKind, NotificationRelay};
use crate::provider::{AuthEvent, AuthProvider, AuthStateChange, ProfileStore, ProviderUser};
use crate::store::{Session, SessionStore};
use crate::timeout::bounded;

/// Access tokens of sessions ended locally are remembered this long, so
/// events still queued for them are not applied afterwards.
const REVOKED_TOKENS: usize = 16;

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub identity: Identity,
    /// `None` when the provider wants the address confirmed first; the
    /// store is left untouched in that case.
    pub session: Option<Session>,
}

/// Suppresses the expiry banner for the SIGNED_OUT caused by our own logout.
///
/// Armed before the remote call, consumed by the first sign-out event,
/// and never honored past `grace` so it cannot leak into a later,
/// unrelated expiry.
struct ManualLogout {
    armed_at: Mutex<Option<Instant>>,
    grace: Duration,
}

impl ManualLogout {
    fn new(grace: Duration) -> Self {
        Self {
            armed_at: Mutex::new(None),
            grace,
        }
    }

    fn arm(&self) {
        *self.armed_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn disarm(&self) {
        *self.armed_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Consume the flag. True only if it was armed within the grace window.
    fn take(&self) -> bool {
        self.armed_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some_and(|at| at.elapsed() <= self.grace)
    }
}

pub struct SessionSynchronizer {
    provider: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    store: Arc<SessionStore>,
    relay: Arc<NotificationRelay>,
    listeners: Arc<Listeners>,
    messages: Messages,
    manual_logout: ManualLogout,
    revoked: Mutex<VecDeque<String>>,
    reconcile_lock: tokio::sync::Mutex<()>,
    timeout: Duration,
}

impl SessionSynchronizer {
    pub fn new(
        config: &SessionConfig,
        provider: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        store: Arc<SessionStore>,
        relay: Arc<NotificationRelay>,
    ) -> Self {
        Self {
            provider,
            profiles,
            store,
            relay,
            listeners: Arc::new(Listeners::default()),
            messages: Messages::new(Locale::parse(&config.locale)),
            manual_logout: ManualLogout::new(config.manual_logout_grace()),
            revoked: Mutex::new(VecDeque::with_capacity(REVOKED_TOKENS)),
            reconcile_lock: tokio::sync::Mutex::new(()),
            timeout: config.request_timeout(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn messages(&self) -> Messages {
        self.messages
    }

    // ====================================================================
    // Operations
    // ====================================================================

    /// Create an account and its profile row (role `user`).
    ///
    /// A failed profile insert is logged and does not undo the account;
    /// the returned identity then comes from baseline claims.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Registration, SessionError> {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(email));

        let created = bounded(
            "sign up",
            self.timeout,
            self.provider.sign_up(email, password, json!({ "name": name })),
        )
        .await?;

        let row = ProfileRecord::new_user(&created.user.id, email, &name);
        let profile = match bounded("profile insert", self.timeout, self.profiles.insert(&row)).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                let err = SessionError::ProfileSync(e.to_string());
                warn!(user_id = %created.user.id, error = %err, "account created without profile row");
                None
            }
        };

        let identity = reconcile(&created.user, profile.as_ref());
        let session = match created.session {
            Some(remote) => {
                let _guard = self.reconcile_lock.lock().await;
                self.store.write(&remote.access_token, &identity)?;
                self.manual_logout.disarm();
                info!(user_id = %identity.id, "registered and signed in");
                Some(Session {
                    access_token: remote.access_token,
                    identity: identity.clone(),
                })
            }
            None => {
                info!(user_id = %identity.id, "registered, confirmation pending");
                None
            }
        };

        Ok(Registration { identity, session })
    }

    /// Authenticate and store the enriched identity.
    ///
    /// On failure the store is not touched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let remote = bounded(
            "sign in",
            self.timeout,
            self.provider.sign_in_with_password(email, password),
        )
        .await?;

        let _guard = self.reconcile_lock.lock().await;
        let identity = self.enrich(&remote.user).await;
        self.store.write(&remote.access_token, &identity)?;
        self.manual_logout.disarm();

        info!(user_id = %identity.id, role = %identity.role, "signed in");
        Ok(Session {
            access_token: remote.access_token,
            identity,
        })
    }

    /// Sign out remotely and clear local state.
    ///
    /// Local state is cleared even when the remote call fails; the provider
    /// then forgets its session on this device only. Calling it while
    /// anonymous is a no-op that succeeds.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let was_active = self.store.is_authenticated();
        if was_active {
            self.manual_logout.arm();
        }

        if let Err(e) = bounded("sign out", self.timeout, self.provider.sign_out()).await {
            warn!(error = %e, "remote sign-out failed, clearing local session anyway");
            let local = bounded("local sign out", self.timeout, self.provider.sign_out_local());
            if let Err(e) = local.await {
                // No SIGNED_OUT will follow.
                self.manual_logout.disarm();
                warn!(error = %e, "provider kept its session");
            }
        }

        let _guard = self.reconcile_lock.lock().await;
        if self.end_session()? {
            info!("signed out");
            self.listeners.emit(&SessionChange {
                reason: ChangeReason::SignedOut,
                identity: None,
            });
        }
        Ok(())
    }

    /// Whether the provider holds a live session. Never fails.
    ///
    /// A definitive "no session" while the store still holds one is
    /// treated as expiry. Network errors only yield `false`.
    pub async fn check_session(&self) -> bool {
        match bounded("session check", self.timeout, self.provider.get_session()).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                let _guard = self.reconcile_lock.lock().await;
                self.apply_signed_out();
                false
            }
            Err(e) => {
                debug!(error = %e, "session check failed");
                false
            }
        }
    }

    /// Update display name and, when given, avatar.
    ///
    /// Fails with [`SessionError::SessionExpired`] when the session ends
    /// while the update is in flight; the store then stays signed out.
    pub async fn update_profile(
        &self,
        name: &str,
        avatar: Option<&str>,
    ) -> Result<Identity, SessionError> {
        let identity = match self.store.read() {
            Some(identity) => identity,
            None => self
                .get_current_identity()
                .await?
                .ok_or_else(SessionError::no_user)?,
        };
        if !self.store.is_authenticated() {
            return Err(SessionError::no_user());
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::Auth("name must not be empty".to_string()));
        }

        let patch = ProfilePatch {
            full_name: name.to_string(),
            avatar_url: avatar.map(str::to_string),
        };
        let row = bounded(
            "profile update",
            self.timeout,
            self.profiles.update_by_id(&identity.id, &patch),
        )
        .await?;

        let mut metadata = json!({ "name": name });
        if let Some(url) = avatar {
            metadata["avatar"] = json!(url);
        }
        if let Err(e) = bounded(
            "metadata update",
            self.timeout,
            self.provider.update_user_metadata(metadata),
        )
        .await
        {
            warn!(user_id = %identity.id, error = %e, "provider metadata not mirrored");
        }

        let _guard = self.reconcile_lock.lock().await;
        // Logout or a token refresh may have landed during the round trips.
        let Some(current) = self.store.snapshot().filter(|s| s.identity.id == identity.id) else {
            warn!(user_id = %identity.id, "session ended during profile update");
            return Err(SessionError::SessionExpired);
        };
        let updated = current.identity.with_profile(&row);
        self.store.write(&current.access_token, &updated)?;
        self.listeners.emit(&SessionChange {
            reason: ChangeReason::ProfileUpdated,
            identity: Some(updated.clone()),
        });

        info!(user_id = %updated.id, "profile updated");
        Ok(updated)
    }

    /// Register a listener for session changes.
    pub fn on_session_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Ask the provider who is signed in, enrich, and store the result.
    pub async fn get_current_identity(&self) -> Result<Option<Identity>, SessionError> {
        let user = bounded("user lookup", self.timeout, self.provider.get_user()).await?;

        let _guard = self.reconcile_lock.lock().await;
        let Some(user) = user else {
            self.apply_signed_out();
            return Ok(None);
        };

        let identity = self.enrich(&user).await;
        let token = match bounded("session lookup", self.timeout, self.provider.get_session()).await {
            Ok(Some(session)) => Some(session.access_token),
            // Signed out between the two lookups.
            Ok(None) => {
                self.apply_signed_out();
                return Ok(None);
            }
            Err(e) => {
                debug!(error = %e, "session lookup failed, keeping cached token");
                self.store.token()
            }
        };

        if let Some(token) = token {
            self.store.write(&token, &identity)?;
        }
        Ok(Some(identity))
    }

    // ====================================================================
    // Provider events
    // ====================================================================

    /// Start consuming the provider's event stream.
    ///
    /// The subscription is taken before this returns, so no event emitted
    /// afterwards is missed. The loop holds only a weak reference and ends
    /// when the synchronizer is dropped or the handle is stopped.
    pub fn listen(self: &Arc<Self>) -> EventLoop {
        let mut events = self.provider.subscribe();
        let this = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(sync) = this.upgrade() else { break };
                match received {
                    Ok(change) => sync.handle_event(change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth events dropped, resynchronizing");
                        sync.resync().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("auth event loop stopped");
        });

        EventLoop { handle }
    }

    /// Reconcile one provider event into the store and notify listeners.
    ///
    /// Events for a session that has since been ended locally are dropped,
    /// as are refreshes and user updates for a session the store no
    /// longer holds.
    pub async fn handle_event(&self, change: AuthStateChange) {
        let _guard = self.reconcile_lock.lock().await;
        match (change.event, change.session) {
            (AuthEvent::SignedOut, _) | (_, None) => self.apply_signed_out(),
            (event, Some(remote)) if self.is_stale(event, &remote.access_token, &remote.user.id) => {
                debug!(user_id = %remote.user.id, ?event, "stale auth event ignored");
            }
            (event, Some(remote)) => {
                let identity = self.enrich(&remote.user).await;
                if let Err(e) = self.store.write(&remote.access_token, &identity) {
                    warn!(error = %e, ?event, "could not persist reconciled session");
                    return;
                }
                let reason = match event {
                    AuthEvent::TokenRefreshed => ChangeReason::TokenRefreshed,
                    AuthEvent::UserUpdated => ChangeReason::ProfileUpdated,
                    _ => ChangeReason::SignedIn,
                };
                debug!(user_id = %identity.id, ?event, "session reconciled");
                self.listeners.emit(&SessionChange {
                    reason,
                    identity: Some(identity),
                });
            }
        }
    }

    /// Rebuild state from the provider after missing events.
    async fn resync(&self) {
        match bounded("session lookup", self.timeout, self.provider.get_session()).await {
            Ok(session) => {
                let event = if self.store.is_authenticated() {
                    AuthEvent::TokenRefreshed
                } else {
                    AuthEvent::InitialSession
                };
                self.handle_event(AuthStateChange { event, session }).await
            }
            Err(e) => warn!(error = %e, "resync failed"),
        }
    }

    // ====================================================================
    // Internals
    // ====================================================================

    /// Baseline claims, then the profile row on top. A failed fetch falls
    /// back to claims alone, which never carry admin from user metadata.
    async fn enrich(&self, user: &ProviderUser) -> Identity {
        match bounded("profile fetch", self.timeout, self.profiles.select_by_id(&user.id)).await {
            Ok(profile) => reconcile(user, profile.as_ref()),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "profile fetch failed, using baseline claims");
                reconcile(user, None)
            }
        }
    }

    /// Whether an event carrying `token` for `user_id` describes a session
    /// that is already over here. Caller holds `reconcile_lock`.
    fn is_stale(&self, event: AuthEvent, token: &str, user_id: &str) -> bool {
        let revoked = self
            .revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t == token);
        if revoked {
            return true;
        }
        match event {
            AuthEvent::TokenRefreshed | AuthEvent::UserUpdated => {
                self.store.read().is_none_or(|held| held.id != user_id)
            }
            _ => false,
        }
    }

    /// Clear the store and remember the token it held. Caller holds
    /// `reconcile_lock`.
    fn end_session(&self) -> Result<bool, SessionError> {
        let token = self.store.token();
        let was_active = self.store.clear()?;
        if let Some(token) = token {
            let mut revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
            if revoked.len() == REVOKED_TOKENS {
                revoked.pop_front();
            }
            revoked.push_back(token);
        }
        Ok(was_active)
    }

    /// Remote sign-out observed. Caller holds `reconcile_lock`.
    fn apply_signed_out(&self) {
        let manual = self.manual_logout.take();
        let was_active = match self.end_session() {
            Ok(was_active) => was_active,
            Err(e) => {
                warn!(error = %e, "could not clear session mirror");
                return;
            }
        };
        if !was_active {
            return;
        }

        let reason = if manual {
            info!("signed out");
            ChangeReason::SignedOut
        } else {
            info!("session expired");
            self.relay
                .show(self.messages.session_expired(), NotificationKind::Error);
            ChangeReason::Expired
        };
        self.listeners.emit(&SessionChange {
            reason,
            identity: None,
        });
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Handle for the provider event loop. Dropping it stops the loop.
pub struct EventLoop {
    handle: JoinHandle<()>,
}

impl EventLoop {
    pub fn stop(self) {}

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::testing::{MemoryAuthProvider, MemoryProfileStore};
    use storefront_kv::MemoryStore;

    struct Fixture {
        provider: Arc<MemoryAuthProvider>,
        profiles: Arc<MemoryProfileStore>,
        relay: Arc<NotificationRelay>,
        sync: Arc<SessionSynchronizer>,
    }

    fn fixture() -> Fixture {
        let config = SessionConfig::default();
        let provider = Arc::new(MemoryAuthProvider::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let relay = Arc::new(NotificationRelay::new(config.notification_clear_delay()));
        let store = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), &config));
        let sync = Arc::new(SessionSynchronizer::new(
            &config,
            provider.clone(),
            profiles.clone(),
            store,
            relay.clone(),
        ));
        Fixture { provider, profiles, relay, sync }
    }

    // ========================================================================
    // ManualLogout
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn manual_logout_is_consumed_once() {
        let flag = ManualLogout::new(Duration::from_secs(10));
        flag.arm();
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_logout_expires() {
        let flag = ManualLogout::new(Duration::from_secs(10));
        flag.arm();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!flag.take());
    }

    #[test]
    fn manual_logout_disarm() {
        let flag = ManualLogout::new(Duration::from_secs(10));
        flag.arm();
        flag.disarm();
        assert!(!flag.take());
    }

    // ========================================================================
    // Direct operations
    // ========================================================================

    #[tokio::test]
    async fn login_failure_leaves_store_empty() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.sync.logout().await.unwrap();

        let err = f.sync.login("a@x.com", "wrong-pw").await.unwrap_err();
        assert_eq!(err, SessionError::Auth("Invalid login credentials".into()));
        assert_eq!(f.sync.store().read(), None);
    }

    #[tokio::test]
    async fn login_enriches_from_profile() {
        let f = fixture();
        let reg = f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.profiles.set_role(&reg.identity.id, Role::Admin);

        let session = f.sync.login("a@x.com", "secret1").await.unwrap();
        assert_eq!(session.identity.role, Role::Admin);
        assert_eq!(f.sync.store().read(), Some(session.identity));
    }

    #[tokio::test]
    async fn profile_fetch_failure_falls_back_to_user() {
        let f = fixture();
        let reg = f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.profiles.set_role(&reg.identity.id, Role::Admin);
        f.profiles.set_offline(true);

        let session = f.sync.login("a@x.com", "secret1").await.unwrap();
        assert_eq!(session.identity.role, Role::User);
        assert_eq!(session.identity.name, "Ann");
    }

    #[tokio::test]
    async fn register_survives_profile_insert_failure() {
        let f = fixture();
        f.profiles.fail_inserts(true);

        let reg = f.sync.register("b@x.com", "secret1", None).await.unwrap();
        assert_eq!(reg.identity.name, "b");
        assert_eq!(reg.identity.role, Role::User);
        assert!(reg.session.is_some());
        assert!(f.profiles.get(&reg.identity.id).is_none());
    }

    #[tokio::test]
    async fn register_pending_confirmation_does_not_sign_in() {
        let f = fixture();
        f.provider.require_confirmation(true);

        let reg = f.sync.register("c@x.com", "secret1", Some("Cy")).await.unwrap();
        assert!(reg.session.is_none());
        assert_eq!(reg.identity.name, "Cy");
        assert_eq!(f.sync.store().read(), None);
    }

    #[tokio::test]
    async fn register_rejections_are_auth_errors() {
        let f = fixture();
        let err = f.sync.register("a@x.com", "123", None).await.unwrap_err();
        assert_eq!(err.error_code(), "AUTH_FAILED");
        assert_eq!(
            f.sync.messages().describe(&err),
            "La contraseña debe tener al menos 6 caracteres"
        );
    }

    #[tokio::test]
    async fn logout_survives_offline_provider() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", None).await.unwrap();
        f.provider.set_offline(true);

        f.sync.logout().await.unwrap();
        assert_eq!(f.sync.store().read(), None);

        // The provider forgot its session too, so coming back online does
        // not revive it.
        f.provider.set_offline(false);
        assert_eq!(f.provider.current_session(), None);
        assert!(!f.sync.check_session().await);
        assert_eq!(f.relay.current().message, None);
    }

    #[tokio::test]
    async fn check_session_network_error_is_false_and_keeps_store() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", None).await.unwrap();
        f.provider.set_offline(true);

        assert!(!f.sync.check_session().await);
        assert!(f.sync.store().is_authenticated());
        assert_eq!(f.relay.current().message, None);
    }

    #[tokio::test]
    async fn check_session_detects_expiry() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", None).await.unwrap();
        f.provider.drop_session_silently();

        assert!(!f.sync.check_session().await);
        assert!(!f.sync.store().is_authenticated());
        let banner = f.relay.current();
        assert!(banner.visible);
        assert_eq!(banner.kind, NotificationKind::Error);
        assert_eq!(banner.message.as_deref(), Some(f.sync.messages().session_expired()));
    }

    #[tokio::test]
    async fn update_profile_rejects_blank_name() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        let err = f.sync.update_profile("   ", None).await.unwrap_err();
        assert_eq!(err, SessionError::Auth("name must not be empty".into()));
        assert_eq!(f.sync.store().read().unwrap().name, "Ann");
    }

    #[tokio::test]
    async fn update_profile_keeps_avatar_when_absent() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.sync
            .update_profile("Ann", Some("https://cdn/a.png"))
            .await
            .unwrap();

        let updated = f.sync.update_profile("Ann Smith", None).await.unwrap();
        assert_eq!(updated.name, "Ann Smith");
        assert_eq!(updated.avatar.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(f.sync.store().read(), Some(updated));
    }

    #[tokio::test]
    async fn update_profile_metadata_failure_is_not_fatal() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.provider.fail_metadata_updates(true);

        let updated = f.sync.update_profile("Ann Smith", None).await.unwrap();
        assert_eq!(updated.name, "Ann Smith");
    }

    #[tokio::test]
    async fn update_profile_rejected_row_is_auth_error() {
        let f = fixture();
        f.profiles.fail_inserts(true);
        f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();

        // No row exists, so the update has nothing to patch.
        let err = f.sync.update_profile("Ann Smith", None).await.unwrap_err();
        assert_eq!(err, SessionError::Auth("No user found".into()));
        assert_eq!(f.sync.store().read().unwrap().name, "Ann");
    }

    #[tokio::test]
    async fn get_current_identity_without_session() {
        let f = fixture();
        assert_eq!(f.sync.get_current_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_current_identity_refreshes_store() {
        let f = fixture();
        let reg = f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        f.profiles.set_role(&reg.identity.id, Role::Admin);

        let identity = f.sync.get_current_identity().await.unwrap().unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(f.sync.store().read(), Some(identity));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_times_out() {
        let f = fixture();
        f.provider.set_latency(Duration::from_secs(60));

        let err = f.sync.login("a@x.com", "secret1").await.unwrap_err();
        assert_eq!(err.error_code(), "TIMEOUT");
    }

    // ========================================================================
    // Event handling
    // ========================================================================

    #[tokio::test]
    async fn listener_sees_store_state() {
        let f = fixture();
        let store = f.sync.store().clone();
        let mismatches = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let m = mismatches.clone();
        let _sub = f.sync.on_session_change(move |change| {
            if change.identity != store.read() {
                m.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let reg = f.sync.register("a@x.com", "secret1", Some("Ann")).await.unwrap();
        let remote = f.provider.current_session().unwrap();
        f.sync
            .handle_event(AuthStateChange {
                event: AuthEvent::TokenRefreshed,
                session: Some(remote),
            })
            .await;
        f.sync.update_profile("Ann Smith", None).await.unwrap();
        f.sync.logout().await.unwrap();

        assert_eq!(mismatches.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!reg.identity.is_admin());
    }

    #[tokio::test]
    async fn sign_out_event_while_anonymous_is_silent() {
        let f = fixture();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = f.sync.on_session_change(move |_| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        f.sync
            .handle_event(AuthStateChange { event: AuthEvent::SignedOut, session: None })
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(f.relay.current().message, None);
    }

    #[tokio::test]
    async fn events_for_ended_session_are_ignored() {
        let f = fixture();
        f.sync.register("a@x.com", "secret1", None).await.unwrap();
        let signed_in = f.provider.current_session().unwrap();
        f.provider.refresh_token().unwrap();
        let refreshed = f.provider.current_session().unwrap();
        f.provider.set_offline(true);
        f.sync.logout().await.unwrap();

        for (event, session) in [
            (AuthEvent::SignedIn, signed_in),
            (AuthEvent::TokenRefreshed, refreshed.clone()),
            (AuthEvent::UserUpdated, refreshed),
        ] {
            f.sync
                .handle_event(AuthStateChange { event, session: Some(session) })
                .await;
            assert_eq!(f.sync.store().read(), None, "{:?} revived the session", event);
        }
    }

    #[tokio::test]
    async fn dropped_synchronizer_stops_event_loop() {
        let f = fixture();
        let events = f.sync.listen();
        let Fixture { provider, sync, .. } = f;
        drop(sync);

        // The next event wakes the loop, which then notices the drop.
        provider.emit(AuthEvent::SignedOut);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(events.is_finished());
    }

    #[tokio::test]
    async fn subscriptions_are_released() {
        let f = fixture();
        let sub = f.sync.on_session_change(|_| {});
        assert_eq!(f.sync.listener_count(), 1);
        drop(sub);
        assert_eq!(f.sync.listener_count(), 0);
    }
}
