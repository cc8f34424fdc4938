// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Registry of combiner definitions and their running runtimes.
//!
//! Definitions and runtimes live in two independent concurrent maps. Only
//! two steps take the registry's lifecycle lock: check-then-insert of a new
//! definition, and removal of a definition. Everything else relies on the
//! maps' own per-entry atomicity.
//!
//! The persisting steps of add and update run as tasks on the fabric's
//! runtime, so they finish even when the caller stops waiting for them.
//!
//! Updating a combiner runs stop-old, install-new, start-new, persist as
//! four separate steps. A crash between them can leave the persisted
//! definition out of step with what was running.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::fabric::Fabric;
use crate::model::DataCombiner;
use crate::ports::{EventSink, LifecycleEvent};
use crate::runtime::CombinationRuntime;
use crate::store::CombinerStore;

/// Outcome of registering a combiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddResult {
    /// The combiner was registered and its runtimes started.
    Success,
    /// A combiner with the same id is already registered; nothing changed.
    AlreadyExists {
        /// Human-readable explanation.
        reason: String,
    },
}

impl AddResult {
    /// Whether the combiner was registered.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Owns every combiner definition and the runtimes built from them.
pub struct CombinerRegistry {
    state: Arc<RegistryState>,
}

struct RegistryState {
    combiners: DashMap<Uuid, DataCombiner>,
    runtimes: DashMap<Uuid, Vec<CombinationRuntime>>,
    lifecycle: Mutex<()>,
    fabric: Fabric,
    store: Arc<dyn CombinerStore>,
    events: Arc<dyn EventSink>,
}

impl CombinerRegistry {
    /// Empty registry wired to `fabric`, persisting through `store`.
    pub fn new(fabric: Fabric, store: Arc<dyn CombinerStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: Arc::new(RegistryState {
                combiners: DashMap::new(),
                runtimes: DashMap::new(),
                lifecycle: Mutex::new(()),
                fabric,
                store,
                events,
            }),
        }
    }

    /// Load every persisted combiner and start it.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), RegistryError> {
        let persisted = self.state.store.all_data_combiners().await?;
        info!(count = persisted.len(), "restoring persisted data combiners");
        for combiner in persisted {
            let id = combiner.id;
            if let AddResult::AlreadyExists { reason } = self.start_combiner(combiner) {
                warn!(combiner_id = %id, %reason, "skipping persisted data combiner");
            }
        }
        Ok(())
    }

    /// Register `combiner` in memory and start its runtimes.
    ///
    /// Returns [`AddResult::AlreadyExists`] without side effects when the
    /// id is taken.
    pub fn start_combiner(&self, combiner: DataCombiner) -> AddResult {
        if !self.state.insert_if_absent(&combiner) {
            warn!(combiner_id = %combiner.id, "data combiner already registered");
            return AddResult::AlreadyExists {
                reason: format!("data combiner {} already exists", combiner.id),
            };
        }
        self.state.start_runtimes(&combiner);
        AddResult::Success
    }

    /// Register `combiner`, persist it, then start its runtimes.
    ///
    /// A taken id fails with [`RegistryError::AlreadyExists`]. When
    /// persisting fails the in-memory registration is rolled back. Dropping
    /// the returned future does not cancel the persist-then-start task.
    pub async fn add_data_combiner(&self, combiner: DataCombiner) -> Result<AddResult, RegistryError> {
        let id = combiner.id;
        if !self.state.insert_if_absent(&combiner) {
            warn!(combiner_id = %id, "data combiner already registered");
            return Err(RegistryError::AlreadyExists(id));
        }
        let state = Arc::clone(&self.state);
        let task = self.state.fabric.runtime.spawn(async move {
            if let Err(err) = state.store.add_data_combiner(combiner.clone()).await {
                error!(combiner_id = %id, %err, "failed to persist data combiner");
                state.remove_definition(id);
                return Err(RegistryError::Persistence(err));
            }
            state.start_runtimes(&combiner);
            Ok(AddResult::Success)
        });
        task.await?
    }

    /// Replace a registered combiner: stop its runtimes, install the new
    /// definition, start new runtimes, persist. Returns `Ok(false)` when the
    /// id is unknown. Like [`CombinerRegistry::add_data_combiner`], the
    /// steps keep running if the returned future is dropped.
    pub async fn update_data_combiner(&self, combiner: DataCombiner) -> Result<bool, RegistryError> {
        let id = combiner.id;
        if !self.state.combiners.contains_key(&id) {
            return Ok(false);
        }
        let state = Arc::clone(&self.state);
        let task = self.state.fabric.runtime.spawn(async move {
            state.stop_runtimes(id);
            match state.combiners.get_mut(&id) {
                Some(mut current) => *current = combiner.clone(),
                None => return Ok(false),
            }
            state.start_runtimes(&combiner);
            if let Err(err) = state.store.update_data_combiner(combiner).await {
                error!(combiner_id = %id, %err, "failed to persist data combiner update");
                return Err(RegistryError::Persistence(err));
            }
            info!(combiner_id = %id, "data combiner updated");
            Ok(true)
        });
        task.await?
    }

    /// Remove a combiner and stop its runtimes before returning. Returns
    /// whether a definition existed.
    ///
    /// Runtimes still being started when this runs are stopped by the
    /// starting side once it sees the definition gone.
    pub fn delete_data_combiner(&self, id: Uuid) -> bool {
        if self.state.remove_definition(id).is_none() {
            return false;
        }
        self.state.stop_runtimes(id);
        info!(combiner_id = %id, "data combiner deleted");
        self.state.events.fire(LifecycleEvent::info(
            id.to_string(),
            format!("Data combiner '{id}' was deleted"),
        ));
        true
    }

    /// Stop the runtimes of one combiner, keeping its definition.
    pub fn stop(&self, id: Uuid) {
        self.state.stop_runtimes(id);
    }

    /// Stop the runtimes of every combiner, keeping the definitions.
    pub fn stop_all(&self) {
        let ids: Vec<Uuid> = self.state.runtimes.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.state.stop_runtimes(id);
        }
    }

    /// Snapshot of one definition.
    pub fn get_combiner_by_id(&self, id: Uuid) -> Option<DataCombiner> {
        self.state.combiners.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every definition.
    pub fn get_all_combiners(&self) -> Vec<DataCombiner> {
        self.state
            .combiners
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of live runtimes of one combiner.
    pub fn running_combinations(&self, id: Uuid) -> usize {
        self.state.runtimes.get(&id).map_or(0, |entry| entry.len())
    }
}

impl RegistryState {
    fn insert_if_absent(&self, combiner: &DataCombiner) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.combiners.contains_key(&combiner.id) {
            return false;
        }
        self.combiners.insert(combiner.id, combiner.clone());
        true
    }

    fn remove_definition(&self, id: Uuid) -> Option<DataCombiner> {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.combiners.remove(&id).map(|(_, combiner)| combiner)
    }

    fn start_runtimes(&self, combiner: &DataCombiner) {
        let runtimes: Vec<CombinationRuntime> = combiner
            .combinations
            .iter()
            .map(|combination| CombinationRuntime::new(combination.clone(), self.fabric.clone()))
            .collect();
        for runtime in &runtimes {
            if let Err(err) = runtime.start() {
                error!(
                    combiner_id = %combiner.id,
                    combination_id = %runtime.combination().id,
                    %err,
                    "failed to start combination"
                );
            }
        }
        let count = runtimes.len();
        if let Some(previous) = self.runtimes.insert(combiner.id, runtimes) {
            previous.iter().for_each(CombinationRuntime::stop);
        }
        if !self.combiners.contains_key(&combiner.id) {
            // deleted while starting
            self.stop_runtimes(combiner.id);
            return;
        }
        info!(combiner_id = %combiner.id, combinations = count, "data combiner started");
    }

    fn stop_runtimes(&self, id: Uuid) {
        if let Some((_, runtimes)) = self.runtimes.remove(&id) {
            runtimes.iter().for_each(CombinationRuntime::stop);
            info!(combiner_id = %id, combinations = runtimes.len(), "data combiner stopped");
        }
    }
}
