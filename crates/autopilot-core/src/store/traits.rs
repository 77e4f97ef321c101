//! Shared key/value store trait.

use crate::error::Result;

/// Persisted string key/value store visible to every supervisor process.
///
/// The store is slow and non-transactional from the caller's point of view:
/// there is no compare-and-swap, so a read followed by a write can race with
/// another process. All operations are synchronous to match rusqlite's API.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read a JSON-encoded value; unparseable values read as `None`.
pub fn read_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    Ok(store
        .get(key)?
        .and_then(|raw| serde_json::from_str(&raw).ok()))
}

/// Write a value as JSON.
pub fn write_json<T: serde::Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
