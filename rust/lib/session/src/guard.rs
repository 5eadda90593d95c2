//! Route-entry guards.
//!
//! A guard answers one question before navigation: may the caller enter,
//! or where should they go instead. [`SessionGuard`] asks the provider;
//! [`RoleGuard`] reads the store only and never touches the network.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::identity::Role;
use crate::store::SessionStore;
use crate::sync::SessionSynchronizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    Redirect(String),
}

impl GuardOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardOutcome::Allow)
    }
}

#[async_trait]
pub trait RouteGuard: Send + Sync {
    async fn check(&self) -> GuardOutcome;
}

// ── SessionGuard ────────────────────────────────────────────────────

/// Admits callers with a live remote session.
pub struct SessionGuard {
    sync: Arc<SessionSynchronizer>,
    login_route: String,
}

impl SessionGuard {
    pub fn new(sync: Arc<SessionSynchronizer>, login_route: impl Into<String>) -> Self {
        Self {
            sync,
            login_route: login_route.into(),
        }
    }
}

#[async_trait]
impl RouteGuard for SessionGuard {
    async fn check(&self) -> GuardOutcome {
        if self.sync.check_session().await {
            GuardOutcome::Allow
        } else {
            debug!(to = %self.login_route, "no session, redirecting");
            GuardOutcome::Redirect(self.login_route.clone())
        }
    }
}

// ── RoleGuard ───────────────────────────────────────────────────────

/// Admits callers whose stored identity satisfies `required`.
pub struct RoleGuard {
    store: Arc<SessionStore>,
    required: Role,
    fallback_route: String,
}

impl RoleGuard {
    pub fn new(store: Arc<SessionStore>, required: Role, fallback_route: impl Into<String>) -> Self {
        Self {
            store,
            required,
            fallback_route: fallback_route.into(),
        }
    }

    /// Synchronous form of [`RouteGuard::check`].
    pub fn evaluate(&self) -> GuardOutcome {
        match self.store.read() {
            Some(identity) if identity.role.satisfies(self.required) => GuardOutcome::Allow,
            _ => {
                debug!(required = %self.required, to = %self.fallback_route, "role check failed");
                GuardOutcome::Redirect(self.fallback_route.clone())
            }
        }
    }
}

#[async_trait]
impl RouteGuard for RoleGuard {
    async fn check(&self) -> GuardOutcome {
        self.evaluate()
    }
}

// ── GuardChain ──────────────────────────────────────────────────────

/// Runs guards in order and stops at the first redirect.
#[derive(Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn RouteGuard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, guard: Arc<dyn RouteGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[async_trait]
impl RouteGuard for GuardChain {
    async fn check(&self) -> GuardOutcome {
        for guard in &self.guards {
            let outcome = guard.check().await;
            if !outcome.is_allowed() {
                return outcome;
            }
        }
        GuardOutcome::Allow
    }
}
