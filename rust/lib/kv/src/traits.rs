use crate::error::KVError;

/// KVStore provides a flat string-keyed byte store.
///
/// Keys are short, unprefixed names such as `token` or `user`.
/// The batch operations are all-or-nothing: either every entry is applied
/// or none is, and a concurrent reader never sees a partial batch.
pub trait KVStore: Send + Sync {
    /// Get the value for a key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KVError>;

    /// Set a key-value pair, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KVError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), KVError>;

    /// Set several key-value pairs atomically.
    fn batch_set(&self, entries: &[(&str, &[u8])]) -> Result<(), KVError>;

    /// Delete several keys atomically. Missing keys are skipped.
    fn batch_delete(&self, keys: &[&str]) -> Result<(), KVError>;
}
