use std::time::Duration;

use thiserror::Error;

use storefront_kv::KVError;

use crate::provider::ProviderError;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. UI code matches on these,
// never on the message text.

pub mod error_code {
    pub const AUTH_FAILED: &str = "AUTH_FAILED";
    pub const PROFILE_SYNC_FAILED: &str = "PROFILE_SYNC_FAILED";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const NETWORK: &str = "NETWORK";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

/// Message carried by [`SessionError::Auth`] when an operation needs a
/// signed-in user and there is none.
pub const NO_USER_LOGGED_IN: &str = "no user logged in";

// ── SessionError ────────────────────────────────────────────────────

/// Errors surfaced by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The provider rejected credentials, a registration, or a profile
    /// mutation. The text is the provider's; see [`crate::Messages`] for
    /// user-facing copy.
    #[error("{0}")]
    Auth(String),

    /// The profile table write failed after the account operation succeeded.
    #[error("profile sync failed: {0}")]
    ProfileSync(String),

    /// The session ended while an operation that needed it was in flight.
    #[error("session expired")]
    SessionExpired,

    /// A provider call exceeded its time budget.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The provider could not be reached.
    #[error("network: {0}")]
    Network(String),

    /// The local mirror could not be read or written.
    #[error("storage: {0}")]
    Storage(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::Auth(_) => error_code::AUTH_FAILED,
            SessionError::ProfileSync(_) => error_code::PROFILE_SYNC_FAILED,
            SessionError::SessionExpired => error_code::SESSION_EXPIRED,
            SessionError::Timeout { .. } => error_code::TIMEOUT,
            SessionError::Network(_) => error_code::NETWORK,
            SessionError::Storage(_) => error_code::STORAGE_ERROR,
        }
    }

    pub fn no_user() -> Self {
        SessionError::Auth(NO_USER_LOGGED_IN.to_string())
    }
}

impl From<ProviderError> for SessionError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Rejected { message, .. } => SessionError::Auth(message),
            ProviderError::Network(m) => SessionError::Network(m),
            ProviderError::Decode(m) => SessionError::Network(format!("unexpected response: {}", m)),
        }
    }
}

impl From<KVError> for SessionError {
    fn from(e: KVError) -> Self {
        SessionError::Storage(e.to_string())
    }
}
