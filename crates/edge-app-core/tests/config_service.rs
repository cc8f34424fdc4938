// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ConfigService behavior over the in-memory store fake.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use edge_app_core::config::{ConfigError, ConfigService};
use edge_app_core::settings::{HostSettings, HOST_SETTINGS_KEY};
use edge_dry_tests::InMemoryConfigStore;

#[test]
fn missing_key_loads_as_none() {
    let service = ConfigService::new(InMemoryConfigStore::new());
    let loaded: Option<HostSettings> = service.load(HOST_SETTINGS_KEY).unwrap();
    assert!(loaded.is_none());
}

#[test]
fn load_or_init_writes_defaults_once() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());

    let first: HostSettings = service.load_or_init(HOST_SETTINGS_KEY).unwrap();
    let second: HostSettings = service.load_or_init(HOST_SETTINGS_KEY).unwrap();

    assert_eq!(first, HostSettings::default());
    assert_eq!(first, second);
    assert_eq!(store.save_count(), 1);
}

#[test]
fn saved_settings_load_back() {
    let service = ConfigService::new(InMemoryConfigStore::new());
    let settings = HostSettings {
        simulate_tags: true,
        simulate_interval_ms: 250,
        ..HostSettings::default()
    };

    service.save(HOST_SETTINGS_KEY, &settings).unwrap();

    let loaded: Option<HostSettings> = service.load(HOST_SETTINGS_KEY).unwrap();
    assert_eq!(loaded, Some(settings));
}

#[test]
fn modify_starts_from_default_and_persists() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());

    let len = service
        .modify("names", |names: &mut Vec<String>| {
            names.push("line1".into());
            Ok(names.len())
        })
        .unwrap();

    assert_eq!(len, 1);
    assert_eq!(store.json("names"), Some(serde_json::json!(["line1"])));
}

#[test]
fn modify_writes_nothing_when_the_closure_fails() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());

    let result = service.modify("names", |_: &mut Vec<String>| -> Result<(), ConfigError> {
        Err(ConfigError::Other("refused".into()))
    });

    assert!(matches!(result, Err(ConfigError::Other(_))));
    assert_eq!(store.save_count(), 0);
}

#[test]
fn store_failures_propagate() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store);
    let loaded: Result<Option<HostSettings>, _> = service.load(HOST_SETTINGS_KEY);
    assert!(matches!(loaded, Err(ConfigError::Other(_))));
}
