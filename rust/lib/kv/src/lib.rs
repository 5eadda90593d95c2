//! Local key-value storage for client-side state.
//!
//! The session mirror (access token + serialized identity) lives here so a
//! restarted process can resume before any network round trip completes.
//! Two backends share the [`KVStore`] trait:
//!
//! - [`RedbStore`]: on-disk, one redb transaction per call.
//! - [`MemoryStore`]: in-process map, the browser `localStorage` analogue.

pub mod error;
pub mod memory;
pub mod redb;
pub mod traits;

pub use error::KVError;
pub use memory::MemoryStore;
pub use redb::RedbStore;
pub use traits::KVStore;
