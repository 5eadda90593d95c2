//! Notification Relay: a single-slot banner.
//!
//! `show` replaces whatever is displayed. `dismiss` hides immediately and
//! clears the text after a short delay so the exit animation still has
//! something to render. Hidden and empty are distinct states.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: Option<String>,
    pub kind: NotificationKind,
    pub visible: bool,
}

pub struct NotificationRelay {
    slot: Arc<watch::Sender<Notification>>,
    /// Bumped by every show/dismiss; a pending clear only runs if nothing
    /// happened since it was scheduled.
    epoch: Arc<AtomicU64>,
    clear_after: Duration,
}

impl NotificationRelay {
    pub fn new(clear_after: Duration) -> Self {
        let (tx, _rx) = watch::channel(Notification::default());
        Self {
            slot: Arc::new(tx),
            epoch: Arc::new(AtomicU64::new(0)),
            clear_after,
        }
    }

    /// Display `message`, replacing the current one.
    pub fn show(&self, message: impl Into<String>, kind: NotificationKind) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let message = message.into();
        debug!(?kind, %message, "notification shown");
        self.slot.send_replace(Notification {
            message: Some(message),
            kind,
            visible: true,
        });
    }

    pub fn success(&self, message: impl Into<String>) {
        self.show(message, NotificationKind::Success);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(message, NotificationKind::Error);
    }

    /// Hide now, clear the text after the configured delay.
    ///
    /// Outside a Tokio runtime the text is cleared immediately.
    pub fn dismiss(&self) {
        let scheduled = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.slot.send_modify(|n| n.visible = false);

        let slot = Arc::clone(&self.slot);
        let epoch = Arc::clone(&self.epoch);
        let delay = self.clear_after;
        let clear = move || {
            if epoch.load(Ordering::SeqCst) == scheduled {
                slot.send_modify(|n| n.message = None);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    clear();
                });
            }
            Err(_) => clear(),
        }
    }

    /// The notification as of now.
    pub fn current(&self) -> Notification {
        self.slot.borrow().clone()
    }

    /// Watch the slot. The receiver sees the latest value, not every one.
    pub fn subscribe(&self) -> watch::Receiver<Notification> {
        self.slot.subscribe()
    }
}

impl Default for NotificationRelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}
