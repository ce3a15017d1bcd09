//! Shared helpers for integration tests: fake store and tuned configs.
#![allow(dead_code)]

pub mod fake_store;

use std::collections::HashMap;
use std::path::Path;

use telemetry_pipeline::{AggregatorConfig, GatewayConfig, Snapshot};

pub use fake_store::FakeStore;

fn lookup(pairs: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<&'static str, String> = pairs.into_iter().collect();
    move |key| map.get(key).cloned()
}

pub fn gateway_config(store_url: &str) -> GatewayConfig {
    GatewayConfig::from_lookup(lookup(vec![
        ("STORE_URL", store_url.to_string()),
        ("STORE_TIMEOUT_MS", "1000".to_string()),
        ("GATEWAY_PORT", "0".to_string()),
    ]))
    .expect("gateway config")
}

/// Short timeouts and backoff so reconnect scenarios finish quickly.
pub fn aggregator_config(store_url: &str, extra: &[(&'static str, &str)]) -> AggregatorConfig {
    let mut pairs = vec![
        ("STORE_URL", store_url.to_string()),
        ("STORE_TIMEOUT_MS", "1000".to_string()),
        ("CONNECT_TIMEOUT_MS", "1000".to_string()),
        ("IDLE_TIMEOUT_MS", "2000".to_string()),
        ("WRITE_TIMEOUT_MS", "1000".to_string()),
        ("BACKOFF_INITIAL_MS", "20".to_string()),
        ("BACKOFF_MAX_MS", "200".to_string()),
        ("SHUTDOWN_GRACE_MS", "2000".to_string()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
    AggregatorConfig::from_lookup(lookup(pairs)).expect("aggregator config")
}

pub fn checkpoint_path(dir: &Path) -> String {
    dir.join("aggregator.json").to_string_lossy().into_owned()
}

pub fn typed_event(event_type: &str) -> Vec<u8> {
    format!(r#"{{"time":"2021-03-04T12:00:00.000Z","type":"{}"}}"#, event_type).into_bytes()
}

pub fn parse_snapshots(records: &[Vec<u8>]) -> Vec<Snapshot> {
    records
        .iter()
        .map(|r| serde_json::from_slice(r).expect("stats record is a snapshot"))
        .collect()
}

pub fn snapshot(pairs: &[(&str, u64)]) -> Snapshot {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

pub fn assert_monotonic(snapshots: &[Snapshot]) {
    for pair in snapshots.windows(2) {
        assert!(
            pair[1].dominates(&pair[0]),
            "snapshot went backwards: {:?} -> {:?}",
            pair[0],
            pair[1]
        );
    }
}
