//! Client-side session lifecycle for the storefront.
//!
//! Reconciles a remotely issued session (access token + refresh token),
//! a locally cached identity, route guards, and a change stream that the
//! rest of the UI listens to.
//!
//! # Components
//!
//! - [`SessionStore`]: current identity + token, mirrored to a [`KVStore`]
//!   so a restart resumes before any network round trip.
//! - [`SessionSynchronizer`]: login / register / logout / profile update,
//!   and the listener that reconciles provider events into the store.
//! - [`SessionGuard`] / [`RoleGuard`]: route-entry predicates.
//! - [`NotificationRelay`]: single-slot banner for expiry and errors.
//! - [`SessionContext`]: owns all of the above for one application run.
//!
//! # Example
//!
//! ```ignore
//! let ctx = SessionContext::start(config, kv, provider, profiles)?;
//!
//! let _sub = ctx.synchronizer().on_session_change(|change| {
//!     println!("{:?}: {:?}", change.reason, change.identity);
//! });
//!
//! let session = ctx.synchronizer().login("a@x.com", "secret1").await?;
//! assert_eq!(ctx.store().read(), Some(session.identity));
//! ```
//!
//! [`KVStore`]: storefront_kv::KVStore

pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod identity;
pub mod listeners;
pub mod messages;
pub mod notify;
pub mod provider;
pub mod store;
pub mod sync;
pub mod timeout;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::SessionConfig;
pub use context::SessionContext;
pub use error::{SessionError, SessionResult};
pub use guard::{GuardChain, GuardOutcome, RoleGuard, RouteGuard, SessionGuard};
pub use identity::{Identity, ProfilePatch, ProfileRecord, Role, reconcile};
pub use listeners::{ChangeReason, SessionChange, Subscription};
pub use messages::{Locale, Messages};
pub use notify::{Notification, NotificationKind, NotificationRelay};
pub use provider::{
    AuthEvent, AuthProvider, AuthStateChange, ProfileStore, ProviderError, ProviderSession,
    ProviderUser, SignUpResult,
};
pub use store::{Session, SessionStore};
pub use sync::{EventLoop, Registration, SessionSynchronizer};
