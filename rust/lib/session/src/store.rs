//! Session Store: the in-process holder of the current identity and token.
//!
//! Every mutation writes the persisted mirror first, in one KV batch, and
//! only then swaps the in-memory value. A failed mirror write leaves both
//! sides as they were.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use storefront_kv::KVStore;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::identity::Identity;

/// An authenticated context: bearer token plus the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub identity: Identity,
}

pub struct SessionStore {
    kv: Arc<dyn KVStore>,
    token_key: String,
    identity_key: String,
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Create an empty store over `kv`. Call [`restore`](Self::restore) to
    /// load a previously persisted session.
    pub fn new(kv: Arc<dyn KVStore>, config: &SessionConfig) -> Self {
        Self {
            kv,
            token_key: config.token_key.clone(),
            identity_key: config.identity_key.clone(),
            current: RwLock::new(None),
        }
    }

    /// Load the mirror into memory.
    ///
    /// A mirror holding only one of its two entries, or an identity that
    /// does not decode, is corrupt: it is wiped and the store starts empty.
    pub fn restore(&self) -> Result<Option<Identity>, SessionError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let token = self.kv.get(&self.token_key)?;
        let identity = self.kv.get(&self.identity_key)?;

        let restored = match (token, identity) {
            (None, None) => None,
            (Some(token), Some(raw)) => {
                match (String::from_utf8(token), serde_json::from_slice::<Identity>(&raw)) {
                    (Ok(access_token), Ok(identity)) if !access_token.is_empty() => {
                        Some(Session { access_token, identity })
                    }
                    _ => {
                        warn!("session mirror is unreadable, discarding");
                        self.wipe()?;
                        None
                    }
                }
            }
            _ => {
                warn!("session mirror is incomplete, discarding");
                self.wipe()?;
                None
            }
        };

        debug!(restored = restored.is_some(), "session mirror loaded");
        let identity = restored.as_ref().map(|s| s.identity.clone());
        *current = restored;
        Ok(identity)
    }

    /// Current identity, if any. No I/O.
    pub fn read(&self) -> Option<Identity> {
        self.snapshot().map(|s| s.identity)
    }

    /// Current access token, if any. No I/O.
    pub fn token(&self) -> Option<String> {
        self.snapshot().map(|s| s.access_token)
    }

    /// Current session (token + identity), if any. No I/O.
    pub fn snapshot(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replace the session in memory and in the mirror.
    pub fn write(&self, token: &str, identity: &Identity) -> Result<(), SessionError> {
        let encoded = serde_json::to_vec(identity)
            .map_err(|e| SessionError::Storage(format!("encode identity: {}", e)))?;

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.kv.batch_set(&[
            (self.token_key.as_str(), token.as_bytes()),
            (self.identity_key.as_str(), encoded.as_slice()),
        ])?;
        *current = Some(Session {
            access_token: token.to_string(),
            identity: identity.clone(),
        });
        Ok(())
    }

    /// Remove the session from memory and the mirror. Idempotent.
    ///
    /// Returns whether a session was held in memory before the call.
    pub fn clear(&self) -> Result<bool, SessionError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        self.wipe()?;
        Ok(current.take().is_some())
    }

    fn wipe(&self) -> Result<(), SessionError> {
        self.kv
            .batch_delete(&[self.token_key.as_str(), self.identity_key.as_str()])?;
        Ok(())
    }
}
