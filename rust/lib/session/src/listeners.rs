//! Session change listeners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::identity::Identity;

/// Why listeners are being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    SignedIn,
    TokenRefreshed,
    ProfileUpdated,
    /// Explicit logout, or a remote sign-out while already anonymous.
    SignedOut,
    /// The remote session ended without a local logout. Consumers should
    /// send the user to the login view.
    Expired,
}

/// Delivered to listeners after the store has been reconciled.
///
/// `identity` is exactly what [`SessionStore::read`] returns at the time
/// of the call.
///
/// [`SessionStore::read`]: crate::SessionStore::read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub reason: ChangeReason,
    pub identity: Option<Identity>,
}

impl SessionChange {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Callback type for session change notifications.
pub type SessionListener = Arc<dyn Fn(&SessionChange) + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    listener: SessionListener,
}

/// Registry of listeners with monotonic ids.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: RwLock<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub(crate) fn add(self: &Arc<Self>, listener: SessionListener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ListenerEntry { id, listener });
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|e| e.id != id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Call every listener in registration order.
    ///
    /// The registry lock is released before calling out, so a listener may
    /// subscribe or unsubscribe from inside its callback.
    pub(crate) fn emit(&self, change: &SessionChange) {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for entry in entries {
            (entry.listener)(change);
        }
    }
}

/// Handle for a registered listener. Dropping it unregisters the listener.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Listeners>,
}

impl Subscription {
    /// Unregister now. Same as dropping the handle.
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for as long as the registry lives.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
