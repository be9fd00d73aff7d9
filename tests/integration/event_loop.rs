//! Integration tests for the event loop
//!
//! These tests drive single iterations and metric checks against scripted
//! collaborators and verify:
//! - commands are applied in arrival order, before the metric check
//! - crossings notify exactly once per zone change
//! - one failing recipient does not stop the others
//! - failed fetches still move the schedule forward
//! - `/value` replies come after the check and use per-subscriber bands

use std::sync::Arc;
use std::time::Duration;

use dominance_watch::actors::BotHandle;
use dominance_watch::storage::{MemoryStore, StateStore, SubscriberMap};
use dominance_watch::transport::Cursor;
use dominance_watch::{GlobalState, Subscriber, Thresholds, Zone};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use crate::helpers::{ScriptedSource, ScriptedTransport, build_loop, loop_config, message};

fn store_with(ids: &[i64]) -> Arc<MemoryStore> {
    let subscribers: SubscriberMap = ids.iter().map(|&id| (id, Subscriber::default())).collect();
    Arc::new(MemoryStore::with_state(subscribers, GlobalState::default()))
}

#[tokio::test]
async fn test_start_and_stop_manage_subscription() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let store = Arc::new(MemoryStore::new());
    let mut event_loop = build_loop(loop_config(), &transport, &source, store.clone());
    let token = CancellationToken::new();

    transport.push_messages(vec![message(1, 100, "/start")]);
    event_loop.run_iteration(&token).await;

    assert!(event_loop.registry().contains(100));
    assert!(store.load_subscribers().contains_key(&100));
    assert!(transport.sent_to(100)[0].starts_with("Subscribed to BTC dominance alerts"));

    transport.push_messages(vec![message(2, 100, "/STOP@dominance_bot")]);
    event_loop.run_iteration(&token).await;

    assert!(!event_loop.registry().contains(100));
    assert!(store.load_subscribers().is_empty());
    assert!(transport.sent_to(100)[1].starts_with("Unsubscribed."));
}

#[tokio::test]
async fn test_crossing_sequence_from_neutral_start() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0, 56.0, 56.0, 44.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store_with(&[7]));

    let mut sent_after_each = Vec::new();
    for _ in 0..4 {
        event_loop.run_metric_check().await.unwrap();
        sent_after_each.push(transport.sent_to(7).len());
    }

    assert_eq!(sent_after_each, vec![0, 1, 1, 2]);
    assert_eq!(
        transport.sent_to(7),
        vec![
            "⚠️ BTC dominance crossed ABOVE 55.00%\nCurrent: 56.00%".to_string(),
            "⚠️ BTC dominance crossed BELOW 45.00%\nCurrent: 44.00%".to_string(),
        ]
    );

    let subscriber = event_loop.registry().get(7).unwrap();
    assert_eq!(subscriber.last_zone, Some(Zone::Below));
    assert_eq!(subscriber.last_value, Some(44.0));
}

#[tokio::test]
async fn test_value_on_lower_bound_alerts_from_no_zone() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[40.0, 56.0, 56.0, 44.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store_with(&[7]));

    for _ in 0..4 {
        event_loop.run_metric_check().await.unwrap();
    }

    // 40 <= 45 is already Below; 56 then alerts Above once; 44 alerts Below once
    let sent = transport.sent_to(7);
    assert_eq!(sent.len(), 3);
    assert!(sent[0].contains("crossed BELOW"));
    assert!(sent[1].contains("crossed ABOVE"));
    assert!(sent[2].contains("crossed BELOW"));
}

#[tokio::test]
async fn test_back_to_neutral_sends_recovery_notice() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[60.0, 50.0, 51.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store_with(&[7]));

    for _ in 0..3 {
        event_loop.run_metric_check().await.unwrap();
    }

    assert_eq!(
        transport.sent_to(7),
        vec![
            "⚠️ BTC dominance crossed ABOVE 55.00%\nCurrent: 60.00%".to_string(),
            "ℹ️ BTC dominance back between thresholds (45.00% - 55.00%)\nCurrent: 50.00%"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn test_send_failure_is_isolated_per_recipient() {
    let transport = ScriptedTransport::new();
    transport.fail_sends_to(2);
    let source = ScriptedSource::with_values(&[60.0]);
    let store = store_with(&[1, 2, 3]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store.clone());

    event_loop.run_metric_check().await.unwrap();

    assert_eq!(transport.sent_to(1).len(), 1);
    assert_eq!(transport.sent_to(3).len(), 1);
    assert!(transport.sent_to(2).is_empty());

    // state advances for everybody, including the unreachable recipient
    let persisted = store.load_subscribers();
    for id in [1, 2, 3] {
        assert_eq!(persisted[&id].last_zone, Some(Zone::Above));
    }

    let stats = event_loop.stats();
    assert_eq!(stats.alerts_sent, 2);
    assert_eq!(stats.send_failures, 1);
}

#[tokio::test]
async fn test_invalid_band_is_skipped_during_check() {
    let mut subscribers = SubscriberMap::new();
    let broken = Subscriber {
        upper: Some(40.0),
        lower: Some(60.0),
        last_zone: None,
        last_value: None,
    };
    subscribers.insert(1, broken.clone());
    subscribers.insert(2, Subscriber::default());
    let store = Arc::new(MemoryStore::with_state(subscribers, GlobalState::default()));

    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[70.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store);

    event_loop.run_metric_check().await.unwrap();

    assert!(transport.sent_to(1).is_empty());
    assert_eq!(transport.sent_to(2).len(), 1);
    assert_eq!(event_loop.registry().get(1), Some(&broken));
}

#[tokio::test]
async fn test_check_persists_registry_and_global_state() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[53.5]);
    let store = store_with(&[1]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store.clone());

    event_loop.run_metric_check().await.unwrap();

    let global = store.load_global();
    assert_eq!(global.last_value, Some(53.5));
    assert_eq!(global.last_zone, None);
    assert!(global.updated_at.is_some());
    assert_eq!(store.load_subscribers()[&1].last_value, Some(53.5));
}

#[tokio::test]
async fn test_failed_fetch_waits_for_next_interval() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::new();
    source.push_failure();
    source.push(50.0);
    let store = store_with(&[1]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store.clone());
    let token = CancellationToken::new();

    event_loop.run_iteration(&token).await;
    event_loop.run_iteration(&token).await;

    // only the first iteration was due; the failure did not trigger a retry storm
    assert_eq!(source.calls(), 1);
    assert_eq!(event_loop.last_value(), None);
    assert_eq!(store.global_saves(), 0);

    let stats = event_loop.stats();
    assert_eq!(stats.checks_attempted, 1);
    assert_eq!(stats.checks_failed, 1);
}

#[tokio::test]
async fn test_commands_apply_before_check_and_value_replies_last() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[65.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, Arc::new(MemoryStore::new()));

    transport.push_messages(vec![
        message(10, 5, "/start"),
        message(11, 5, "/value"),
        message(12, 5, "/thresholds 70 30"),
        message(13, 5, "/value"),
    ]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    let sent = transport.sent_to(5);
    // 65 is neutral for 70/30, so there is no alert, and /value is answered once
    assert_eq!(sent.len(), 3);
    assert!(sent[0].starts_with("Subscribed"));
    assert_eq!(sent[1], "Saved thresholds. upper=70.00%, lower=30.00%");
    assert_eq!(
        sent[2],
        "BTC dominance is 65.00% (zone: neutral)\nYour thresholds: upper=70.00%, lower=30.00%"
    );
}

#[tokio::test]
async fn test_rejected_thresholds_reply_with_reason_and_create_nothing() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let store = Arc::new(MemoryStore::new());
    let mut event_loop = build_loop(loop_config(), &transport, &source, store.clone());

    transport.push_messages(vec![
        message(1, 9, "/thresholds 30 70"),
        message(2, 9, "/upper abc"),
        message(3, 9, "/lower"),
        message(4, 9, "/upper 101"),
    ]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    assert_eq!(
        transport.sent_to(9),
        vec![
            "Threshold error: Lower must be less than upper".to_string(),
            "Threshold error: 'abc' is not a number".to_string(),
            "Threshold error: Usage: /lower <value>".to_string(),
            "Threshold error: Upper must be between 0 and 100".to_string(),
        ]
    );
    assert!(!event_loop.registry().contains(9));
    assert!(!store.load_subscribers().contains_key(&9));
}

#[tokio::test]
async fn test_settings_and_reset_replies() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, Arc::new(MemoryStore::new()));

    transport.push_messages(vec![
        message(1, 4, "/settings"),
        message(2, 4, "/lower 0"),
        message(3, 4, "/settings"),
        message(4, 4, "/reset"),
        message(5, 4, "/settings"),
        message(6, 4, "hello there"),
        message(7, 4, "/frobnicate"),
    ]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    assert_eq!(
        transport.sent_to(4),
        vec![
            "Your thresholds: upper=55.00%, lower=45.00%\nUsing global defaults.".to_string(),
            "Saved thresholds. upper=55.00%, lower=0.00%".to_string(),
            "Your thresholds: upper=55.00%, lower=0.00%\nUsing custom.".to_string(),
            "Your thresholds have been reset to global defaults.".to_string(),
            "Your thresholds: upper=55.00%, lower=45.00%\nUsing global defaults.".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_value_uses_cached_value_without_fetching() {
    let store = Arc::new(MemoryStore::with_state(
        SubscriberMap::new(),
        GlobalState::observed(48.25),
    ));
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::new();
    let mut event_loop = build_loop(loop_config(), &transport, &source, store);

    // the scheduled check fails, the cached value from disk still answers
    transport.push_messages(vec![message(1, 3, "/value")]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    assert_eq!(source.calls(), 1);
    assert_eq!(
        transport.sent_to(3),
        vec![
            "BTC dominance is 48.25% (zone: neutral)\nYour thresholds: upper=55.00%, lower=45.00%"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn test_value_unavailable_after_opportunistic_fetch_fails() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::new();
    let mut event_loop = build_loop(loop_config(), &transport, &source, Arc::new(MemoryStore::new()));

    transport.push_messages(vec![message(1, 3, "/value")]);
    event_loop.run_iteration(&CancellationToken::new()).await;

    // the scheduled check plus one opportunistic fetch
    assert_eq!(source.calls(), 2);
    assert_eq!(
        transport.sent_to(3),
        vec!["BTC dominance value not available. Try again shortly.".to_string()]
    );
}

#[tokio::test]
async fn test_cursor_moves_past_consumed_messages() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, Arc::new(MemoryStore::new()));
    let token = CancellationToken::new();

    transport.push_messages(vec![
        message(5, 1, "/help"),
        message(6, 1, "/help"),
        message(7, 1, "/help"),
    ]);
    event_loop.run_iteration(&token).await;
    assert_eq!(event_loop.cursor(), Cursor::at(8));

    // a redelivered id does not rewind the cursor
    transport.push_messages(vec![message(6, 1, "/help")]);
    event_loop.run_iteration(&token).await;
    event_loop.run_iteration(&token).await;

    assert_eq!(
        transport.cursors_seen(),
        vec![Cursor::new(), Cursor::at(8), Cursor::at(8)]
    );
}

#[tokio::test]
async fn test_receive_failure_does_not_skip_check() {
    let transport = ScriptedTransport::new();
    transport.push_failure();
    let source = ScriptedSource::with_values(&[60.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store_with(&[1]));

    event_loop.run_iteration(&CancellationToken::new()).await;

    assert_eq!(source.calls(), 1);
    assert_eq!(transport.sent_to(1).len(), 1);
}

#[tokio::test]
async fn test_cancelled_iteration_does_nothing() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[60.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store_with(&[1]));
    let token = CancellationToken::new();
    token.cancel();

    event_loop.run_iteration(&token).await;

    assert_eq!(source.calls(), 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_handle_check_now_stats_and_shutdown() {
    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[50.0, 61.0]);
    let store = Arc::new(MemoryStore::new());
    let mut config = loop_config();
    config.seed_subscriber = Some(42);

    let (handle, task) = BotHandle::spawn(
        config,
        transport.clone(),
        source.clone(),
        store.clone(),
        CancellationToken::new(),
    );

    // the first iteration consumes 50.0; this check gets 61.0
    let stats = wait_for_check(&handle).await;
    assert_eq!(stats.subscribers, 1);

    let value = handle.check_now().await.unwrap();
    assert_eq!(value, 61.0);
    assert_eq!(
        transport.sent_to(42),
        vec!["⚠️ BTC dominance crossed ABOVE 55.00%\nCurrent: 61.00%".to_string()]
    );

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.last_value, Some(61.0));
    assert_eq!(stats.checks_attempted, 2);
    assert_eq!(stats.alerts_sent, 1);

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("event loop did not stop")
        .unwrap();
    assert!(handle.check_now().await.is_err());
    assert!(store.load_subscribers().contains_key(&42));
}

#[tokio::test]
async fn test_panicking_iteration_does_not_stop_the_loop() {
    let transport = ScriptedTransport::new();
    transport.push_panic();
    transport.push_messages(vec![message(1, 7, "/start")]);
    let source = ScriptedSource::with_values(&[50.0]);
    let store = Arc::new(MemoryStore::new());

    let (handle, task) = BotHandle::spawn(
        loop_config(),
        transport.clone(),
        source.clone(),
        store.clone(),
        CancellationToken::new(),
    );

    // the panicking iteration never reached its check; the next one did
    let stats = wait_for_check(&handle).await;
    assert_eq!(stats.checks_attempted, 1);
    assert_eq!(stats.last_value, Some(50.0));
    assert_eq!(stats.subscribers, 1);
    assert!(transport.receive_count() >= 2);
    assert!(transport.sent_to(7)[0].starts_with("Subscribed to BTC dominance alerts"));

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("event loop did not stop")
        .unwrap();
    assert!(store.load_subscribers().contains_key(&7));
}

async fn wait_for_check(handle: &BotHandle) -> dominance_watch::actors::LoopStats {
    for _ in 0..200 {
        let stats = handle.stats().await.unwrap();
        if stats.checks_attempted > 0 {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("first metric check never ran");
}

#[tokio::test]
async fn test_custom_band_is_used_for_alerts() {
    let mut subscribers = SubscriberMap::new();
    subscribers.insert(
        1,
        Subscriber {
            upper: Some(70.0),
            lower: Some(30.0),
            ..Subscriber::default()
        },
    );
    subscribers.insert(2, Subscriber::default());
    let store = Arc::new(MemoryStore::with_state(subscribers, GlobalState::default()));

    let transport = ScriptedTransport::new();
    let source = ScriptedSource::with_values(&[60.0]);
    let mut event_loop = build_loop(loop_config(), &transport, &source, store);

    event_loop.run_metric_check().await.unwrap();

    assert!(transport.sent_to(1).is_empty());
    assert_eq!(transport.sent_to(2).len(), 1);
    assert_eq!(
        event_loop.registry().effective_thresholds(1),
        Thresholds::new(70.0, 30.0)
    );
}
