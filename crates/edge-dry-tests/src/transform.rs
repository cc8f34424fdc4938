// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transformation hook double.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use edge_combining::{Combination, PublishMessage, TransformError, TransformationHook};
use uuid::Uuid;

#[derive(Default)]
struct Counts {
    added: HashMap<Uuid, usize>,
    removed: HashMap<Uuid, usize>,
    applied: usize,
}

/// [`TransformationHook`] counting script installs/removals per combination.
/// Leaves messages untouched unless told to fail.
#[derive(Clone, Default)]
pub struct RecordingTransformation {
    counts: Arc<Mutex<Counts>>,
    fail: Arc<AtomicBool>,
}

impl RecordingTransformation {
    /// Hook that passes everything through.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `apply_mappings` fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Script installs for `combination_id`.
    pub fn added(&self, combination_id: Uuid) -> usize {
        self.lock().added.get(&combination_id).copied().unwrap_or(0)
    }

    /// Script removals for `combination_id`.
    pub fn removed(&self, combination_id: Uuid) -> usize {
        self.lock().removed.get(&combination_id).copied().unwrap_or(0)
    }

    /// Number of `apply_mappings` calls.
    pub fn applied(&self) -> usize {
        self.lock().applied
    }
}

#[async_trait]
impl TransformationHook for RecordingTransformation {
    fn add_script_for_data_combining(&self, combination: &Combination) {
        *self.lock().added.entry(combination.id).or_default() += 1;
    }

    fn remove_script_for_data_combining(&self, combination: &Combination) {
        *self.lock().removed.entry(combination.id).or_default() += 1;
    }

    async fn apply_mappings(
        &self,
        _message: &mut PublishMessage,
        combination: &Combination,
    ) -> Result<(), TransformError> {
        self.lock().applied += 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransformError {
                combination_id: combination.id,
                reason: "simulated mapping failure".into(),
            });
        }
        Ok(())
    }
}
