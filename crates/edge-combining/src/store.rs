// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persistent storage of combiner definitions.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use edge_app_core::config::{ConfigError, ConfigService, ConfigStore};
use uuid::Uuid;

use crate::model::DataCombiner;

/// Config key holding every persisted combiner as a JSON array.
pub const DATA_COMBINERS_KEY: &str = "data_combiners";

/// Persistent configuration store for combiners.
#[async_trait]
pub trait CombinerStore: Send + Sync {
    /// Every persisted combiner, in insertion order.
    async fn all_data_combiners(&self) -> Result<Vec<DataCombiner>, ConfigError>;
    /// Persist a new combiner. Fails if the id is already stored.
    async fn add_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError>;
    /// Replace the stored combiner with the same id. Fails if none is stored.
    async fn update_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError>;
    /// Drop a stored combiner; returns whether one was stored.
    async fn remove_data_combiner(&self, id: Uuid) -> Result<bool, ConfigError>;
}

/// [`CombinerStore`] over a [`ConfigStore`], keeping the whole list under
/// [`DATA_COMBINERS_KEY`].
///
/// Calls are serialized and run on Tokio's blocking pool.
pub struct ConfigCombinerStore<S> {
    service: Arc<Mutex<ConfigService<S>>>,
}

impl<S> ConfigCombinerStore<S>
where
    S: ConfigStore + Send + 'static,
{
    /// Store persisting through `store`.
    pub fn new(store: S) -> Self {
        Self {
            service: Arc::new(Mutex::new(ConfigService::new(store))),
        }
    }

    async fn with_service<R, F>(&self, f: F) -> Result<R, ConfigError>
    where
        R: Send + 'static,
        F: FnOnce(&ConfigService<S>) -> Result<R, ConfigError> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || {
            let service = service.lock().unwrap_or_else(PoisonError::into_inner);
            f(&service)
        })
        .await
        .map_err(|err| ConfigError::Other(format!("config task failed: {err}")))?
    }
}

#[async_trait]
impl<S> CombinerStore for ConfigCombinerStore<S>
where
    S: ConfigStore + Send + 'static,
{
    async fn all_data_combiners(&self) -> Result<Vec<DataCombiner>, ConfigError> {
        self.with_service(|service| {
            Ok(service
                .load::<Vec<DataCombiner>>(DATA_COMBINERS_KEY)?
                .unwrap_or_default())
        })
        .await
    }

    async fn add_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError> {
        self.with_service(move |service| {
            service.modify(DATA_COMBINERS_KEY, |all: &mut Vec<DataCombiner>| {
                if all.iter().any(|c| c.id == combiner.id) {
                    return Err(ConfigError::Other(format!(
                        "data combiner {} already persisted",
                        combiner.id
                    )));
                }
                all.push(combiner);
                Ok(())
            })
        })
        .await
    }

    async fn update_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError> {
        self.with_service(move |service| {
            service.modify(DATA_COMBINERS_KEY, |all: &mut Vec<DataCombiner>| {
                let slot = all
                    .iter_mut()
                    .find(|c| c.id == combiner.id)
                    .ok_or_else(|| ConfigError::NotFound(combiner.id.to_string()))?;
                *slot = combiner;
                Ok(())
            })
        })
        .await
    }

    async fn remove_data_combiner(&self, id: Uuid) -> Result<bool, ConfigError> {
        self.with_service(move |service| {
            service.modify(DATA_COMBINERS_KEY, |all: &mut Vec<DataCombiner>| {
                let before = all.len();
                all.retain(|c| c.id != id);
                Ok(all.len() != before)
            })
        })
        .await
    }
}
