// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Monitoring Integration Tests
//!
//! Data change delivery from the transport through monitored nodes to their
//! event channels.
//!
//! ## Test Categories
//!
//! - `test_registry_*`: node registration
//! - `test_change_*`: change normalization and delivery
//! - `test_channel_*`: bounded buffering and fan-out
//! - `test_failure_*`: per-node failure isolation
//! - `test_read_*`: one-shot reads

use std::collections::HashSet;

use uamon_opcua::client::mock::ops;
use uamon_opcua::{ChangeEvent, NodeEvent, OpcUaError, OpcUaValue};
use uamon_tests::prelude::*;

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_registry_keeps_construction_order() {
    let harness = TestHarness::started().await;
    let identifiers = NodeFixtures::batch(5);

    for id in &identifiers {
        harness.node(id);
    }

    let registered: Vec<String> = harness
        .registry
        .all()
        .iter()
        .map(|n| n.identifier().to_string())
        .collect();
    assert_eq!(registered, identifiers);
    assert_eq!(
        harness.registry.get(2).unwrap().identifier(),
        identifiers[2].as_str()
    );
}

#[tokio::test]
async fn test_registry_registers_each_node_once() {
    let harness = TestHarness::started().await;

    let node = harness.monitored_node(NodeFixtures::VAR1).await;

    assert_eq!(harness.registry.len(), 1);
    let found = harness.registry.find(NodeFixtures::VAR1).unwrap();
    assert!(std::sync::Arc::ptr_eq(&found, &node));
    assert!(harness.registry.find(NodeFixtures::VAR2).is_none());
}

// =============================================================================
// Change Delivery
// =============================================================================

#[tokio::test]
async fn test_change_scalar_is_published() {
    init_test_logging();
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    let mut listener = node.listener().subscribe();

    let before = chrono::Utc::now();
    assert_eq!(harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(42)), 1);

    let event = recv_change_within(&mut listener, DEFAULT_WAIT).await;
    assert_eq!(event.node_identifier, NodeFixtures::VAR1);
    assert_eq!(event.value, "42");
    assert!(event.timestamp >= before);
    assert_no_event(&mut listener);
}

#[tokio::test]
async fn test_change_without_scalar_is_dropped() {
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    let mut listener = node.listener().subscribe();

    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::missing());
    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::array());
    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::string("ok"));

    // The only published event is the one after the malformed notifications.
    let event = recv_change_within(&mut listener, DEFAULT_WAIT).await;
    assert_eq!(event.value, "ok");
    assert_eq!(node.listener().stats().events_published, 1);
}

#[tokio::test]
async fn test_change_silent_flag_does_not_suppress_events() {
    let harness = TestHarness::started().await;
    let node = harness.node(NodeFixtures::VAR1);
    node.start_monitoring(false).await.unwrap();
    let mut listener = node.listener().subscribe();

    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::double(21.5));

    assert_eq!(recv_change_within(&mut listener, DEFAULT_WAIT).await.value, "21.5");
}

#[tokio::test]
async fn test_change_order_is_preserved_per_node() {
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    let mut listener = node.listener().subscribe();

    for i in 1..=5 {
        harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(i));
    }

    let mut values = Vec::new();
    for _ in 0..5 {
        values.push(recv_change_within(&mut listener, DEFAULT_WAIT).await.value);
    }
    assert_eq!(values, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_change_routed_only_to_its_node() {
    let harness = TestHarness::started().await;
    let var1 = harness.monitored_node(NodeFixtures::VAR1).await;
    let var2 = harness.monitored_node(NodeFixtures::VAR2).await;
    let mut listener1 = var1.listener().subscribe();
    let mut listener2 = var2.listener().subscribe();

    harness.emit_change(NodeFixtures::VAR2, ValueFixtures::int(7));

    let event = recv_change_within(&mut listener2, DEFAULT_WAIT).await;
    assert_eq!(event.node_identifier, NodeFixtures::VAR2);
    assert_no_event(&mut listener1);
}

#[tokio::test]
async fn test_change_item_error_uses_error_topic() {
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    let mut listener = node.listener().subscribe();

    harness.emit_error(NodeFixtures::VAR1, "BadNodeIdUnknown");

    match recv_within(&mut listener, DEFAULT_WAIT).await {
        NodeEvent::Error(e) => {
            assert_eq!(e.node_identifier, NodeFixtures::VAR1);
            assert!(e.error.contains("BadNodeIdUnknown"));
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    // Monitoring continues after an item error.
    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(1));
    assert_eq!(recv_change_within(&mut listener, DEFAULT_WAIT).await.value, "1");
}

#[tokio::test]
async fn test_change_event_json_shape() {
    let event = ChangeEvent::now(NodeFixtures::VAR1, "42");

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["nodeIdentifier"], NodeFixtures::VAR1);
    assert_eq!(json["value"], "42");
    assert!(json["timestamp"].is_string());

    let tagged = serde_json::to_value(NodeEvent::Change(event)).unwrap();
    assert_eq!(tagged["topic"], "change");
    assert_eq!(tagged["event"]["value"], "42");
}

// =============================================================================
// Channel Bounds
// =============================================================================

#[tokio::test]
async fn test_channel_slow_listener_receives_latest_ten() {
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    assert_eq!(node.listener().capacity(), 10);
    let mut listener = node.listener().subscribe();

    for i in 0..15 {
        harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(i));
    }
    wait_until("all changes published", DEFAULT_WAIT, || {
        node.listener().stats().events_published == 15
    })
    .await;

    let mut values = Vec::new();
    while let Some(NodeEvent::Change(event)) = listener.try_recv() {
        values.push(event.value);
    }

    let expected: Vec<String> = (5..15).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);
    assert_eq!(listener.dropped(), 5);
}

#[tokio::test]
async fn test_channel_capacity_follows_queue_size() {
    let mut harness = TestHarness::with_settings(SettingsFixtures::queue_size(3));
    harness.start().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;

    assert_eq!(node.listener().capacity(), 3);
    assert_eq!(harness.transport.item_requests()[0].settings.queue_size, 3);
}

#[tokio::test]
async fn test_channel_fans_out_to_every_listener() {
    let harness = TestHarness::started().await;
    let node = harness.monitored_node(NodeFixtures::VAR1).await;
    let mut listeners: Vec<_> = (0..3).map(|_| node.listener().subscribe()).collect();

    harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(9));

    for listener in &mut listeners {
        assert_eq!(recv_change_within(listener, DEFAULT_WAIT).await.value, "9");
    }
    assert_eq!(node.listener().stats().listener_count, 3);
}

// =============================================================================
// Failure Isolation
// =============================================================================

#[tokio::test]
async fn test_failure_monitoring_one_node_does_not_stop_others() {
    init_test_logging();
    let harness = TestHarness::started().await;
    harness
        .transport
        .fail_node(&NodeFixtures::id(NodeFixtures::VAR1), "BadNodeIdUnknown");

    let broken = harness.monitored_node(NodeFixtures::VAR1).await;
    let healthy = harness.monitored_node(NodeFixtures::VAR2).await;
    let mut listener = healthy.listener().subscribe();

    assert!(!broken.is_monitoring());
    assert!(healthy.is_monitoring());
    assert_eq!(harness.transport.call_count(ops::CREATE_MONITORED_ITEM), 2);

    harness.emit_change(NodeFixtures::VAR2, ValueFixtures::int(5));
    assert_eq!(recv_change_within(&mut listener, DEFAULT_WAIT).await.value, "5");
}

#[tokio::test]
async fn test_failure_unparsable_identifier_is_skipped() {
    let harness = TestHarness::started().await;

    let malformed = harness.monitored_node(NodeFixtures::MALFORMED).await;
    let healthy = harness.monitored_node(NodeFixtures::CURRENT_TIME).await;

    assert!(!malformed.is_monitoring());
    assert!(healthy.is_monitoring());
    assert_eq!(harness.transport.call_count(ops::CREATE_MONITORED_ITEM), 1);
    assert_eq!(harness.registry.len(), 2);
}

#[tokio::test]
async fn test_failure_item_ids_are_distinct() {
    let harness = TestHarness::started().await;
    let mut ids = HashSet::new();

    for id in NodeFixtures::batch(4) {
        let node = harness.monitored_node(&id).await;
        assert!(ids.insert(node.monitored_item_id().unwrap()));
    }
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_read_returns_current_value() {
    let harness = TestHarness::started().await;
    harness
        .transport
        .set_value(&NodeFixtures::id(NodeFixtures::CURRENT_TIME), ValueFixtures::double(3.5));
    let node = harness.node(NodeFixtures::CURRENT_TIME);

    let value = node.read_var().await.unwrap();

    assert_eq!(value.scalar(), Some(&OpcUaValue::Double(3.5)));
    assert!(value.server_timestamp.is_some());
    assert_eq!(harness.transport.call_count(ops::READ), 1);
}

#[tokio::test]
async fn test_read_missing_value_is_not_an_error() {
    let harness = TestHarness::started().await;
    let node = harness.node(NodeFixtures::VAR1);

    let value = node.read_var().await.unwrap();

    assert!(value.scalar().is_none());
}

#[tokio::test]
async fn test_read_failure_is_reported() {
    let harness = TestHarness::started().await;
    harness
        .transport
        .fail_node(&NodeFixtures::id(NodeFixtures::VAR1), "BadUserAccessDenied");
    let node = harness.node(NodeFixtures::VAR1);

    let err = node.read_var().await.unwrap_err();

    assert!(matches!(err, OpcUaError::Read(_)));
    assert!(err.to_string().contains("BadUserAccessDenied") || {
        let mut source = std::error::Error::source(&err);
        let mut found = false;
        while let Some(cause) = source {
            found |= cause.to_string().contains("BadUserAccessDenied");
            source = cause.source();
        }
        found
    });
}
