//! Application-scoped owner of the session components.
//!
//! Exactly one [`SessionContext`] exists per application run. It restores
//! the mirror, wires the synchronizer to the relay and the store, and runs
//! the provider event loop until [`SessionContext::shutdown`] (or drop).

use std::sync::Arc;

use storefront_kv::KVStore;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::guard::{GuardChain, RoleGuard, SessionGuard};
use crate::identity::Role;
use crate::notify::NotificationRelay;
use crate::provider::{AuthProvider, ProfileStore};
use crate::store::SessionStore;
use crate::sync::{EventLoop, SessionSynchronizer};

pub struct SessionContext {
    config: SessionConfig,
    store: Arc<SessionStore>,
    relay: Arc<NotificationRelay>,
    sync: Arc<SessionSynchronizer>,
    events: Option<EventLoop>,
}

impl SessionContext {
    /// Restore the mirror and start listening to the provider.
    ///
    /// Must be called from within a tokio runtime. An unreadable mirror is
    /// discarded rather than failing startup; only a store that can be
    /// neither read nor cleared is an error.
    pub fn start(
        config: SessionConfig,
        kv: Arc<dyn KVStore>,
        provider: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Result<Self, SessionError> {
        let store = Arc::new(SessionStore::new(kv, &config));
        match store.restore() {
            Ok(Some(identity)) => info!(user_id = %identity.id, "session restored"),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "session mirror unavailable, starting anonymous");
                store.clear()?;
            }
        }

        let relay = Arc::new(NotificationRelay::new(config.notification_clear_delay()));
        let sync = Arc::new(SessionSynchronizer::new(
            &config,
            provider,
            profiles,
            store.clone(),
            relay.clone(),
        ));
        let events = Some(sync.listen());

        Ok(Self {
            config,
            store,
            relay,
            sync,
            events,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn relay(&self) -> &Arc<NotificationRelay> {
        &self.relay
    }

    pub fn synchronizer(&self) -> &Arc<SessionSynchronizer> {
        &self.sync
    }

    /// Guard for pages that need a live session.
    pub fn session_guard(&self) -> SessionGuard {
        SessionGuard::new(self.sync.clone(), self.config.login_route.clone())
    }

    /// Guard for admin pages.
    pub fn admin_guard(&self) -> RoleGuard {
        RoleGuard::new(self.store.clone(), Role::Admin, self.config.home_route.clone())
    }

    /// Session check followed by the admin role check.
    pub fn admin_chain(&self) -> GuardChain {
        GuardChain::new()
            .with(Arc::new(self.session_guard()))
            .with(Arc::new(self.admin_guard()))
    }

    pub fn is_listening(&self) -> bool {
        self.events.as_ref().is_some_and(|e| !e.is_finished())
    }

    /// Stop the event loop. Local state is left as is.
    pub fn shutdown(&mut self) {
        if let Some(events) = self.events.take() {
            events.stop();
            info!("session context stopped");
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
