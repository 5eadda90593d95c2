//! HTTP bindings for the hosted backend.
//!
//! Implements the session crate's collaborator traits over the backend's
//! REST surface:
//!
//! - [`SupabaseAuth`]: `AuthProvider` over `/auth/v1`, with a persisted,
//!   auto-refreshing session and an auth event stream.
//! - [`PostgrestProfiles`]: `ProfileStore` over `/rest/v1/profiles`.
//!
//! Authentication for data requests is pluggable through [`TokenSource`].
//!
//! # Usage
//!
//! ```ignore
//! use storefront_client::{BackendConfig, PostgrestProfiles, SupabaseAuth};
//!
//! let backend = BackendConfig::new("https://xyz.supabase.co", "anon-key");
//! let auth = Arc::new(SupabaseAuth::new(backend.clone(), kv.clone()));
//! let profiles = Arc::new(PostgrestProfiles::new(backend, auth.clone()));
//! let ctx = SessionContext::start(config, kv, auth, profiles)?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod profiles;
pub mod refresh;
pub mod token;

pub use auth::SupabaseAuth;
pub use config::BackendConfig;
pub use error::ApiError;
pub use profiles::PostgrestProfiles;
pub use refresh::AutoRefresh;
pub use token::{NoAuth, SessionToken, StaticToken, TokenSource};
