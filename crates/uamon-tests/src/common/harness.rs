// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! Bundles a [`ScriptedTransport`], a [`SessionController`] bound to it and
//! a [`NodeRegistry`], so scenarios read as composition-root code.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uamon_opcua::{
    ChangeEvent, ControllerSettings, DataValue, EventListener, MonitoredNode, NodeEvent,
    NodeRegistry, ScriptedTransport, SessionController,
};

use super::fixtures::{NodeFixtures, ENDPOINT};

/// Default upper bound for waiting on an asynchronous outcome.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// TestHarness
// =============================================================================

/// Scripted transport, controller and registry for one test.
pub struct TestHarness {
    /// The scripted transport.
    pub transport: Arc<ScriptedTransport>,

    /// Controller bound to [`ENDPOINT`] and the transport.
    pub controller: SessionController,

    /// Registry for the nodes constructed through the harness.
    pub registry: NodeRegistry,
}

impl TestHarness {
    /// Creates a harness with default settings; nothing is connected yet.
    pub fn new() -> Self {
        Self::with_settings(ControllerSettings::default())
    }

    /// Creates a harness with custom controller settings.
    pub fn with_settings(settings: ControllerSettings) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let controller =
            SessionController::new(Some(ENDPOINT.to_string()), Some(transport.clone()))
                .with_settings(settings);
        Self {
            transport,
            controller,
            registry: NodeRegistry::new(),
        }
    }

    /// Creates a harness and runs connect, session and subscription setup.
    pub async fn started() -> Self {
        let mut harness = Self::new();
        harness.start().await;
        harness
    }

    /// Runs the full setup chain, panicking on failure.
    pub async fn start(&mut self) {
        self.controller
            .start()
            .await
            .unwrap_or_else(|e| panic!("controller setup failed: {}", e));
    }

    /// Constructs a node bound to the controller's current handles.
    pub fn node(&self, identifier: &str) -> Arc<MonitoredNode> {
        MonitoredNode::new(identifier, &self.controller, &self.registry)
    }

    /// Constructs a node and starts monitoring it silently.
    pub async fn monitored_node(&self, identifier: &str) -> Arc<MonitoredNode> {
        let node = self.node(identifier);
        node.start_monitoring(true)
            .await
            .unwrap_or_else(|e| panic!("start_monitoring({}) failed: {}", identifier, e));
        node
    }

    /// Emits a data change for `identifier`; returns the items reached.
    pub fn emit_change(&self, identifier: &str, value: DataValue) -> usize {
        self.transport
            .emit_change(&NodeFixtures::id(identifier), value)
    }

    /// Emits an item error for `identifier`; returns the items reached.
    pub fn emit_error(&self, identifier: &str, message: &str) -> usize {
        self.transport
            .emit_error(&NodeFixtures::id(identifier), message)
    }

    /// Runs `test_fn` bounded by `timeout`.
    pub async fn run<F, Fut>(self, timeout: Duration, test_fn: F)
    where
        F: FnOnce(TestHarness) -> Fut,
        Fut: Future<Output = ()>,
    {
        if tokio::time::timeout(timeout, test_fn(self)).await.is_err() {
            panic!("Test timed out after {:?}", timeout);
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Waiting helpers
// =============================================================================

/// Receives the next event or panics after `wait`.
pub async fn recv_within(listener: &mut EventListener, wait: Duration) -> NodeEvent {
    match tokio::time::timeout(wait, listener.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("no event within {:?}", wait),
    }
}

/// Receives the next change event or panics after `wait`.
pub async fn recv_change_within(listener: &mut EventListener, wait: Duration) -> ChangeEvent {
    match recv_within(listener, wait).await {
        NodeEvent::Change(event) => event,
        other => panic!("expected a change event, got {:?}", other),
    }
}

/// Polls `condition` until it holds or panics after `wait`.
pub async fn wait_until<F>(what: &str, wait: Duration, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + wait;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Asserts that nothing more is buffered for `listener`.
pub fn assert_no_event(listener: &mut EventListener) {
    if let Some(event) = listener.try_recv() {
        panic!("unexpected event {:?}", event);
    }
}
