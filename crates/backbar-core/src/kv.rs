use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BackbarError;

/// Synchronous string key/value persistence supplied by the host.
pub trait KeyValueStore {
    /// # Errors
    /// Returns [`BackbarError::Storage`] when the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, BackbarError>;

    /// # Errors
    /// Returns [`BackbarError::Storage`] when the backend cannot be written.
    fn set(&mut self, key: &str, value: &str) -> Result<(), BackbarError>;

    /// Deleting a missing key is not an error.
    ///
    /// # Errors
    /// Returns [`BackbarError::Storage`] when the backend cannot be written.
    fn delete(&mut self, key: &str) -> Result<(), BackbarError>;

    /// # Errors
    /// Returns [`BackbarError::Storage`] when the backend cannot be read.
    fn list_keys(&self) -> Result<Vec<String>, BackbarError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    fn get(&self, key: &str) -> Result<Option<String>, BackbarError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackbarError> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<(), BackbarError> {
        (**self).delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>, BackbarError> {
        (**self).list_keys()
    }
}

/// Process-local store, used for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, BackbarError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackbarError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), BackbarError> {
        self.entries.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, BackbarError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

pub(crate) fn load_json<T: DeserializeOwned>(
    store: &impl KeyValueStore,
    key: &str,
) -> Result<Option<T>, BackbarError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| BackbarError::Serialization(format!("{key}: {err}"))),
        None => Ok(None),
    }
}

pub(crate) fn save_json<T: Serialize>(
    store: &mut impl KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), BackbarError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
