// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use edge_app_core::config::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect or sabotage the store through another.
///
/// # Example
///
/// ```
/// use edge_dry_tests::InMemoryConfigStore;
/// use edge_app_core::config::ConfigService;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// service.save("combining_host", &serde_json::json!({"simulateTags": true})).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key("combining_host"));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given key-value pairs.
    pub fn with_data(data: HashMap<String, Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Raw bytes stored under `key` parsed as JSON, if present and valid.
    pub fn json(&self, key: &str) -> Option<serde_json::Value> {
        let inner = self.lock();
        let bytes = inner.data.get(key)?;
        serde_json::from_slice(bytes).ok()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;

        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }

        inner.data.get(key).cloned().ok_or_else(|| ConfigError::NotFound(key.into()))
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;

        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }

        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_key_returns_not_found() {
        let store = InMemoryConfigStore::new();
        assert!(matches!(store.load_raw("missing"), Err(ConfigError::NotFound(_))));
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn failed_save_counts_but_stores_nothing() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(store.save_raw("k", b"v"), Err(ConfigError::Other(_))));
        assert_eq!(store.save_count(), 1);
        assert!(!store.contains_key("k"));

        store.set_fail_on_save(false);
        store.save_raw("k", b"v").unwrap();
        assert!(store.contains_key("k"));
    }

    #[test]
    fn clones_share_state() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("shared", b"[1]").unwrap();
        assert_eq!(b.load_raw("shared").unwrap(), b"[1]");
        assert_eq!(b.json("shared"), Some(serde_json::json!([1])));

        b.set_fail_on_load(true);
        assert!(a.load_raw("shared").is_err());
    }

    #[test]
    fn with_data_prepopulates_store() {
        let mut initial = HashMap::new();
        initial.insert("key1".to_string(), b"value1".to_vec());
        let store = InMemoryConfigStore::with_data(initial);
        assert_eq!(store.load_raw("key1").unwrap(), b"value1");
        assert_eq!(store.save_count(), 0);
    }
}
