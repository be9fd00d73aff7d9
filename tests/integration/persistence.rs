//! Integration tests for file persistence across restarts
//!
//! These tests verify that:
//! - subscriber overrides and zones survive a restart
//! - the last value is restored for /value replies
//! - legacy and corrupted files are handled without crashing

use std::fs;
use std::path::Path;
use std::sync::Arc;

use dominance_watch::storage::{JsonFileStore, StateStore};
use dominance_watch::{Zone, actors::EventLoop};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use crate::helpers::{ScriptedSource, ScriptedTransport, build_loop, loop_config, message};

fn file_store(dir: &Path) -> Arc<JsonFileStore> {
    Arc::new(JsonFileStore::new(
        dir.join("subscribers.json"),
        dir.join("state.json"),
    ))
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn restart(
    dir: &Path,
    transport: &Arc<ScriptedTransport>,
    source: &Arc<ScriptedSource>,
) -> EventLoop {
    build_loop(loop_config(), transport, source, file_store(dir))
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempdir().unwrap();
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[62.0, 63.0]);
    let token = CancellationToken::new();

    {
        let mut event_loop = restart(dir.path(), &transport, &source);
        transport.push_messages(vec![message(1, 11, "/start"), message(2, 11, "/upper 60")]);
        event_loop.run_iteration(&token).await;
    }
    let alerts_before = transport
        .sent_to(11)
        .iter()
        .filter(|text| text.contains("crossed ABOVE 60.00%"))
        .count();
    assert_eq!(alerts_before, 1);

    let raw = read_json(&dir.path().join("subscribers.json"));
    assert_eq!(raw["version"], 2);
    assert_eq!(raw["subscribers"]["11"]["upper"], 60.0);
    assert_eq!(raw["subscribers"]["11"]["lower"], Value::Null);
    assert_eq!(raw["subscribers"]["11"]["last_zone"], "above");

    let mut event_loop = restart(dir.path(), &transport, &source);
    assert_eq!(event_loop.last_value(), Some(62.0));
    let subscriber = event_loop.registry().get(11).unwrap().clone();
    assert_eq!(subscriber.upper, Some(60.0));
    assert_eq!(subscriber.last_zone, Some(Zone::Above));

    transport.clear_sent();
    event_loop.run_iteration(&token).await;

    // still above after the restart: no duplicate alert
    assert!(transport.sent_to(11).is_empty());
    assert_eq!(
        file_store(dir.path()).load_global().last_value,
        Some(63.0)
    );
}

#[tokio::test]
async fn test_legacy_id_list_is_upgraded_on_first_write() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("subscribers.json"), "[101, \"102\"]").unwrap();

    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[30.0]);
    let mut event_loop = restart(dir.path(), &transport, &source);
    assert_eq!(event_loop.registry().len(), 2);

    event_loop.run_iteration(&CancellationToken::new()).await;

    assert_eq!(transport.sent_to(101).len(), 1);
    assert_eq!(transport.sent_to(102).len(), 1);
    let raw = read_json(&dir.path().join("subscribers.json"));
    assert_eq!(raw["version"], 2);
    assert_eq!(raw["subscribers"]["102"]["last_zone"], "below");
}

#[tokio::test]
async fn test_corrupted_files_start_empty_and_recover() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("subscribers.json"), "{ not json").unwrap();
    fs::write(dir.path().join("state.json"), "").unwrap();

    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let mut event_loop = restart(dir.path(), &transport, &source);
    assert!(event_loop.registry().is_empty());
    assert_eq!(event_loop.last_value(), None);

    transport.push_messages(vec![message(1, 5, "/start")]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    let store = file_store(dir.path());
    assert!(store.load_subscribers().contains_key(&5));
    assert_eq!(store.load_global().last_value, Some(50.0));
    assert!(!dir.path().join("subscribers.json.tmp").exists());
}

#[tokio::test]
async fn test_rejected_update_leaves_file_untouched() {
    let dir = tempdir().unwrap();
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let mut event_loop = restart(dir.path(), &transport, &source);
    let token = CancellationToken::new();

    transport.push_messages(vec![message(1, 8, "/thresholds 70 30")]);
    event_loop.run_iteration(&token).await;
    let before = fs::read_to_string(dir.path().join("subscribers.json")).unwrap();

    transport.push_messages(vec![message(2, 8, "/lower 80")]);
    event_loop.run_iteration(&token).await;

    assert_eq!(
        fs::read_to_string(dir.path().join("subscribers.json")).unwrap(),
        before
    );
    assert_eq!(
        transport.sent_to(8).last().unwrap(),
        "Threshold error: Lower must be less than upper"
    );
}
