// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config service and storage port for gateway components.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Where config blobs live. Keys are logical names such as
/// `combining_host`; the store decides how they map to storage.
pub trait ConfigStore {
    /// Raw bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace whatever is stored under `key` with `data`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Errors from config storage and (de)serialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("config key {0:?} not found")]
    NotFound(String),
    /// The store cannot represent this key.
    #[error("invalid config key {0:?}")]
    InvalidKey(String),
    /// Underlying I/O failed.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not the expected JSON.
    #[error("config json: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else a store or caller reports.
    #[error("config: {0}")]
    Other(String),
}

/// Thin service that serializes config values as JSON and delegates storage
/// to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Service persisting through `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the inner store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the store back.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Value stored under `key`; `Ok(None)` when the key is missing or empty.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Load `key`, falling back to `T::default()` when missing.
    ///
    /// When the key was missing the default is written back once so the
    /// on-disk file documents every knob.
    pub fn load_or_init<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        if let Some(value) = self.load(key)? {
            return Ok(value);
        }
        let value = T::default();
        self.save(key, &value)?;
        Ok(value)
    }

    /// Store `value` under `key` as pretty-printed JSON.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Read-modify-write of the value stored under `key`.
    ///
    /// A missing key starts from `T::default()`. Nothing is written when `f`
    /// returns an error. Callers sharing a store must serialize calls
    /// themselves; the service holds no lock.
    pub fn modify<T, R, F>(&self, key: &str, f: F) -> Result<R, ConfigError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<R, ConfigError>,
    {
        let mut value: T = self.load(key)?.unwrap_or_default();
        let out = f(&mut value)?;
        self.save(key, &value)?;
        Ok(out)
    }
}
