// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Combiner registry lifecycle against recording doubles and an in-memory
//! config store.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edge_app_core::config::{ConfigError, ConfigService};
use edge_app_core::events::EventSeverity;
use edge_combining::{
    AddResult, CombinerRegistry, CombinerStore, ConfigCombinerStore, DataCombiner, RegistryError,
    SourceRef, DATA_COMBINERS_KEY,
};
use edge_dry_tests::{wait_until, CombinationBuilder, InMemoryConfigStore, TestFabric};
use tokio::time::timeout;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

/// Combiner store whose writes take `delay` and optionally fail afterwards.
struct SlowStore {
    inner: ConfigCombinerStore<InMemoryConfigStore>,
    delay: Duration,
    fail: AtomicBool,
}

impl SlowStore {
    fn new(config: &InMemoryConfigStore, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: ConfigCombinerStore::new(config.clone()),
            delay,
            fail: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl CombinerStore for SlowStore {
    async fn all_data_combiners(&self) -> Result<Vec<DataCombiner>, ConfigError> {
        self.inner.all_data_combiners().await
    }

    async fn add_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError> {
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConfigError::Other("store unavailable".into()));
        }
        self.inner.add_data_combiner(combiner).await
    }

    async fn update_data_combiner(&self, combiner: DataCombiner) -> Result<(), ConfigError> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_data_combiner(combiner).await
    }

    async fn remove_data_combiner(&self, id: Uuid) -> Result<bool, ConfigError> {
        self.inner.remove_data_combiner(id).await
    }
}

fn slow_registry(doubles: &TestFabric, store: Arc<SlowStore>) -> CombinerRegistry {
    CombinerRegistry::new(doubles.fabric(), store, Arc::new(doubles.events.clone()))
}

fn combiner_with_tags(tags: &[(&str, &str)]) -> DataCombiner {
    DataCombiner::new(
        tags.iter()
            .map(|(tag, scope)| CombinationBuilder::new(SourceRef::tag(*tag, *scope)).build())
            .collect(),
    )
}

fn persisted(store: &InMemoryConfigStore) -> Vec<DataCombiner> {
    ConfigService::new(store.clone())
        .load(DATA_COMBINERS_KEY)
        .unwrap()
        .unwrap_or_default()
}

#[tokio::test]
async fn add_persists_then_starts_every_combination() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    let registry = doubles.registry(&store);
    let combiner = combiner_with_tags(&[("t1", "a"), ("t2", "b")]);

    let result = registry.add_data_combiner(combiner.clone()).await.unwrap();

    assert_eq!(result, AddResult::Success);
    assert_eq!(persisted(&store), vec![combiner.clone()]);
    assert_eq!(registry.running_combinations(combiner.id), 2);
    assert_eq!(doubles.tags.consumer_count(), 2);
    assert_eq!(registry.get_combiner_by_id(combiner.id), Some(combiner));
    registry.stop_all();
}

#[tokio::test]
async fn adding_a_known_id_is_rejected_without_side_effects() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    let registry = doubles.registry(&store);
    let combiner = combiner_with_tags(&[("t1", "a")]);
    registry.add_data_combiner(combiner.clone()).await.unwrap();
    let saves = store.save_count();

    let result = registry.add_data_combiner(combiner.clone()).await;

    assert!(matches!(result, Err(RegistryError::AlreadyExists(id)) if id == combiner.id));
    assert_eq!(store.save_count(), saves);
    assert_eq!(doubles.tags.added().len(), 1);
    registry.stop_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_of_one_id_register_it_once() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    let registry = Arc::new(doubles.registry(&store));
    let combiner = combiner_with_tags(&[("t1", "a")]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let combiner = combiner.clone();
            tokio::spawn(async move { registry.add_data_combiner(combiner).await })
        })
        .collect();
    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(persisted(&store).len(), 1);
    assert_eq!(doubles.tags.added().len(), 1);
    registry.stop_all();
}

#[tokio::test]
async fn failed_persistence_rolls_back_the_registration() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    store.set_fail_on_save(true);
    let registry = doubles.registry(&store);
    let combiner = combiner_with_tags(&[("t1", "a")]);

    let result = registry.add_data_combiner(combiner.clone()).await;

    assert!(matches!(result, Err(RegistryError::Persistence(_))));
    assert!(registry.get_combiner_by_id(combiner.id).is_none());
    assert!(doubles.tags.added().is_empty());

    store.set_fail_on_save(false);
    assert!(registry.add_data_combiner(combiner).await.unwrap().is_success());
    registry.stop_all();
}

#[tokio::test]
async fn start_combiner_reports_duplicates_as_a_result() {
    let doubles = TestFabric::new();
    let registry = doubles.registry(&InMemoryConfigStore::new());
    let combiner = combiner_with_tags(&[("t1", "a")]);

    assert_eq!(registry.start_combiner(combiner.clone()), AddResult::Success);
    let again = registry.start_combiner(combiner);

    assert!(matches!(again, AddResult::AlreadyExists { reason } if reason.contains("already exists")));
    assert_eq!(doubles.tags.added().len(), 1);
    registry.stop_all();
}

#[tokio::test]
async fn start_restores_persisted_combiners() {
    let doubles = TestFabric::new();
    let config = InMemoryConfigStore::new();
    let store = ConfigCombinerStore::new(config.clone());
    let first = combiner_with_tags(&[("t1", "a")]);
    let second = combiner_with_tags(&[("t2", "b"), ("t3", "c")]);
    store.add_data_combiner(first.clone()).await.unwrap();
    store.add_data_combiner(second.clone()).await.unwrap();
    let registry = doubles.registry(&config);

    registry.start().await.unwrap();

    assert_eq!(registry.get_all_combiners().len(), 2);
    assert_eq!(registry.running_combinations(first.id), 1);
    assert_eq!(registry.running_combinations(second.id), 2);
    assert_eq!(doubles.tags.consumer_count(), 3);
    registry.stop_all();
}

#[tokio::test]
async fn start_surfaces_store_failures() {
    let doubles = TestFabric::new();
    let config = InMemoryConfigStore::new();
    config.set_fail_on_load(true);
    let registry = doubles.registry(&config);

    assert!(matches!(
        registry.start().await,
        Err(RegistryError::Persistence(_))
    ));
}

#[tokio::test]
async fn update_of_unknown_id_is_a_no_op() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    let registry = doubles.registry(&store);

    let updated = registry
        .update_data_combiner(combiner_with_tags(&[("t1", "a")]))
        .await
        .unwrap();

    assert!(!updated);
    assert_eq!(store.save_count(), 0);
    assert!(doubles.tags.added().is_empty());
}

#[tokio::test]
async fn update_replaces_runtimes_then_persists() {
    let doubles = TestFabric::new();
    let store = InMemoryConfigStore::new();
    let registry = doubles.registry(&store);
    let original = combiner_with_tags(&[("old", "a")]);
    registry.add_data_combiner(original.clone()).await.unwrap();
    let old_combination = original.combinations[0].id;

    let mut replacement = combiner_with_tags(&[("new1", "a"), ("new2", "a")]);
    replacement.id = original.id;
    let updated = registry
        .update_data_combiner(replacement.clone())
        .await
        .unwrap();

    assert!(updated);
    assert_eq!(
        doubles.tags.removed(),
        vec![("old".to_string(), Some("a".to_string()))]
    );
    assert_eq!(doubles.transformation.removed(old_combination), 1);
    assert_eq!(doubles.tags.consumer_count(), 2);
    assert_eq!(registry.running_combinations(original.id), 2);
    assert_eq!(registry.get_combiner_by_id(original.id), Some(replacement.clone()));
    assert_eq!(persisted(&store), vec![replacement]);
    registry.stop_all();
}

#[tokio::test]
async fn delete_stops_runtimes_and_fires_an_event() {
    let doubles = TestFabric::new();
    let registry = doubles.registry(&InMemoryConfigStore::new());
    let combiner = combiner_with_tags(&[("t1", "a"), ("t2", "b")]);
    registry.add_data_combiner(combiner.clone()).await.unwrap();

    assert!(registry.delete_data_combiner(combiner.id));

    assert_eq!(doubles.tags.consumer_count(), 0);
    assert_eq!(registry.running_combinations(combiner.id), 0);
    assert!(registry.get_combiner_by_id(combiner.id).is_none());
    let events = doubles.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].severity, EventSeverity::Info);
    assert_eq!(events[0].source, combiner.id.to_string());
    assert!(events[0].message.contains("deleted"));

    assert!(!registry.delete_data_combiner(combiner.id));
    assert_eq!(doubles.events.events().len(), 1);
}

#[tokio::test]
async fn stop_keeps_the_definition() {
    let doubles = TestFabric::new();
    let registry = doubles.registry(&InMemoryConfigStore::new());
    let first = combiner_with_tags(&[("t1", "a")]);
    let second = combiner_with_tags(&[("t2", "b")]);
    registry.start_combiner(first.clone());
    registry.start_combiner(second.clone());

    registry.stop(first.id);

    assert_eq!(registry.running_combinations(first.id), 0);
    assert_eq!(registry.running_combinations(second.id), 1);
    assert!(registry.get_combiner_by_id(first.id).is_some());

    registry.stop_all();

    assert_eq!(registry.running_combinations(second.id), 0);
    assert_eq!(registry.get_all_combiners().len(), 2);
    assert_eq!(doubles.tags.consumer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_add_and_delete_never_leak_runtimes() {
    let doubles = TestFabric::new();
    let registry = Arc::new(doubles.registry(&InMemoryConfigStore::new()));
    let combiners: Vec<DataCombiner> = (0..16)
        .map(|i| combiner_with_tags(&[("t", if i % 2 == 0 { "even" } else { "odd" })]))
        .collect();

    let mut tasks = Vec::new();
    for combiner in &combiners {
        let adder = Arc::clone(&registry);
        let added = combiner.clone();
        tasks.push(tokio::spawn(async move {
            let _ = adder.add_data_combiner(added).await;
        }));
        let deleter = Arc::clone(&registry);
        let id = combiner.id;
        tasks.push(tokio::spawn(async move {
            deleter.delete_data_combiner(id);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut live = 0;
    for combiner in &combiners {
        let running = registry.running_combinations(combiner.id);
        let registered = registry.get_combiner_by_id(combiner.id).is_some();
        assert_eq!(running > 0, registered, "combiner {}", combiner.id);
        live += running;
    }
    assert_eq!(doubles.tags.consumer_count(), live);
    registry.stop_all();
    assert_eq!(doubles.tags.consumer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_add_still_persists_and_starts() {
    let doubles = TestFabric::new();
    let config = InMemoryConfigStore::new();
    let registry = slow_registry(&doubles, SlowStore::new(&config, Duration::from_millis(200)));
    let combiner = combiner_with_tags(&[("t1", "a")]);

    let abandoned = timeout(
        Duration::from_millis(20),
        registry.add_data_combiner(combiner.clone()),
    )
    .await;
    assert!(abandoned.is_err());

    assert!(wait_until(WAIT, || registry.running_combinations(combiner.id) == 1).await);
    assert_eq!(persisted(&config), vec![combiner.clone()]);
    assert_eq!(doubles.tags.consumer_count(), 1);
    registry.stop_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_add_that_fails_to_persist_is_rolled_back() {
    let doubles = TestFabric::new();
    let config = InMemoryConfigStore::new();
    let store = SlowStore::new(&config, Duration::from_millis(200));
    store.fail.store(true, Ordering::SeqCst);
    let registry = slow_registry(&doubles, Arc::clone(&store));
    let combiner = combiner_with_tags(&[("t1", "a")]);

    let abandoned = timeout(
        Duration::from_millis(20),
        registry.add_data_combiner(combiner.clone()),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(registry.get_combiner_by_id(combiner.id).is_some());

    assert!(wait_until(WAIT, || registry.get_combiner_by_id(combiner.id).is_none()).await);
    assert_eq!(registry.running_combinations(combiner.id), 0);
    assert!(doubles.tags.added().is_empty());

    store.fail.store(false, Ordering::SeqCst);
    let retried = registry.add_data_combiner(combiner.clone()).await.unwrap();
    assert_eq!(retried, AddResult::Success);
    assert_eq!(registry.running_combinations(combiner.id), 1);
    registry.stop_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_update_still_completes() {
    let doubles = TestFabric::new();
    let config = InMemoryConfigStore::new();
    let registry = slow_registry(&doubles, SlowStore::new(&config, Duration::from_millis(100)));
    let original = combiner_with_tags(&[("old", "a")]);
    registry.add_data_combiner(original.clone()).await.unwrap();

    let mut replacement = combiner_with_tags(&[("new", "a")]);
    replacement.id = original.id;
    let abandoned = timeout(
        Duration::from_millis(20),
        registry.update_data_combiner(replacement.clone()),
    )
    .await;
    assert!(abandoned.is_err());

    assert!(wait_until(WAIT, || persisted(&config) == vec![replacement.clone()]).await);
    assert_eq!(registry.get_combiner_by_id(original.id), Some(replacement));
    assert_eq!(registry.running_combinations(original.id), 1);
    registry.stop_all();
}
