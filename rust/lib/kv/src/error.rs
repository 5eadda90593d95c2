use thiserror::Error;

/// Failures of the local key-value store.
#[derive(Error, Debug)]
pub enum KVError {
    /// The database could not be opened, read, or committed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A writer panicked while holding the in-memory map.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}
