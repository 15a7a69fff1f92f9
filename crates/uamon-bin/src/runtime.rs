// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client runtime orchestration.
//!
//! The runtime is the composition root: it owns the configuration and the
//! transport, builds the [`SessionController`], constructs one
//! [`MonitoredNode`] per configured identifier into a [`NodeRegistry`] and
//! forwards every node's events to the output until shutdown.
//!
//! ```text
//! connect → create_session → create_subscription
//!        → MonitoredNode::new (× N) → start_monitoring (× N)
//!        → print events … until SIGINT/SIGTERM → disconnect
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use uamon_opcua::{
    BrowseReference, DataValue, LifecycleSignal, MonitoredNode, NodeEvent, NodeId,
    NodeRegistry, OpcUaTransport, SessionController,
};

use crate::config::{ConfigLoader, UamonConfig};
use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

/// Creates the production transport.
#[cfg(feature = "real-transport")]
pub fn default_transport() -> BinResult<Arc<dyn OpcUaTransport>> {
    use uamon_opcua::{RealTransport, RealTransportConfig};

    Ok(Arc::new(RealTransport::new(RealTransportConfig::default())))
}

/// Creates the production transport.
#[cfg(not(feature = "real-transport"))]
pub fn default_transport() -> BinResult<Arc<dyn OpcUaTransport>> {
    Err(BinError::config(
        "uamon was built without the `real-transport` feature",
    ))
}

// =============================================================================
// RunSummary / ReadOutcome
// =============================================================================

/// Counters reported when `run` finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Nodes with an active monitored item.
    pub nodes_monitored: usize,
    /// Change events written.
    pub changes_written: u64,
    /// Error events written.
    pub errors_written: u64,
}

/// Result of reading one configured node.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// Node identifier as configured.
    pub node_identifier: String,
    /// Value read, or the failure message.
    pub result: Result<DataValue, String>,
}

impl ReadOutcome {
    /// Renders the outcome as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.result {
            Ok(value) => json!({
                "nodeIdentifier": self.node_identifier,
                "value": value.value.as_ref().map(|v| v.to_string()),
                "type": value.value.as_ref().map(|v| v.type_name()),
                "statusCode": value.status_code,
                "sourceTimestamp": value.source_timestamp.map(|t| t.to_rfc3339()),
                "serverTimestamp": value.server_timestamp.map(|t| t.to_rfc3339()),
            }),
            Err(message) => json!({
                "nodeIdentifier": self.node_identifier,
                "error": message,
            }),
        }
    }
}

// =============================================================================
// ClientRuntime
// =============================================================================

/// Owns the configuration and transport for one uamon invocation.
pub struct ClientRuntime {
    config: Arc<UamonConfig>,
    transport: Arc<dyn OpcUaTransport>,
    shutdown: ShutdownCoordinator,
    silent: bool,
    print_errors: bool,
}

impl ClientRuntime {
    /// Creates a runtime.
    pub fn new(config: UamonConfig, transport: Arc<dyn OpcUaTransport>) -> Self {
        let silent = config.silent;
        Self {
            config: Arc::new(config),
            transport,
            shutdown: ShutdownCoordinator::new(),
            silent,
            print_errors: false,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UamonConfig {
        &self.config
    }

    /// Returns a handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    fn controller(&self) -> SessionController {
        SessionController::new(Some(self.config.endpoint.clone()), Some(self.transport.clone()))
            .with_settings(self.config.controller_settings())
    }

    /// Connects and creates a session, without a subscription.
    async fn open_session(&self) -> BinResult<SessionController> {
        let mut controller = self.controller();
        controller
            .connect()
            .await
            .map_err(|e| BinError::from(e).with_context("connect"))?;
        if let Err(e) = controller.create_session().await {
            close_controller(&mut controller).await;
            return Err(BinError::from(e).with_context("create session"));
        }
        Ok(controller)
    }

    // =========================================================================
    // run
    // =========================================================================

    /// Monitors every configured node and writes each event to `out` as one
    /// JSON line until shutdown.
    pub async fn run<W: Write>(self, out: &mut W) -> BinResult<RunSummary> {
        info!(endpoint = %self.config.endpoint, "Starting uamon v{}", crate::VERSION);

        let mut controller = self.controller();
        if let Err(e) = controller.start().await {
            close_controller(&mut controller).await;
            return Err(e.into());
        }

        let registry = NodeRegistry::new();
        for identifier in &self.config.nodes {
            MonitoredNode::new(identifier.as_str(), &controller, &registry);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarders: Vec<JoinHandle<()>> = registry
            .all()
            .into_iter()
            .map(|node| spawn_forwarder(&node, tx.clone(), self.print_errors))
            .collect();
        drop(tx);

        for node in registry.all() {
            if let Err(e) = node.start_monitoring(self.silent).await {
                forwarders.iter().for_each(JoinHandle::abort);
                close_controller(&mut controller).await;
                return Err(e.into());
            }
        }

        let mut summary = RunSummary {
            nodes_monitored: registry.all().iter().filter(|n| n.is_monitoring()).count(),
            ..Default::default()
        };
        info!(
            monitored = summary.nodes_monitored,
            configured = registry.len(),
            "uamon is ready"
        );

        let mut lifecycle = controller.lifecycle_events();
        let mut lifecycle_open = true;
        let mut events_open = true;
        let shutdown = self.shutdown.clone();
        let wait = shutdown.wait_for_shutdown();
        tokio::pin!(wait);

        let result = loop {
            tokio::select! {
                _ = &mut wait => break Ok(()),
                event = rx.recv(), if events_open => {
                    let Some(event) = event else {
                        events_open = false;
                        continue;
                    };
                    if let Err(e) = write_event(out, &event) {
                        break Err(BinError::from(e).with_context("write event"));
                    }
                    match event {
                        NodeEvent::Change(_) => summary.changes_written += 1,
                        NodeEvent::Error(_) => summary.errors_written += 1,
                    }
                }
                signal = lifecycle.recv(), if lifecycle_open => match signal {
                    Ok(LifecycleSignal::Terminated { subscription_id, reason }) => {
                        warn!(subscription_id, reason = %reason, "No further changes will arrive");
                    }
                    Ok(LifecycleSignal::KeepAlive { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => lifecycle_open = false,
                },
            }
        };

        info!("Shutting down");
        for forwarder in forwarders {
            forwarder.abort();
        }
        close_controller(&mut controller).await;
        info!(
            changes = summary.changes_written,
            errors = summary.errors_written,
            "uamon shutdown complete"
        );
        result.map(|_| summary)
    }

    // =========================================================================
    // read / browse
    // =========================================================================

    /// Reads every configured node once.
    ///
    /// Per-node failures are reported in the outcome.
    pub async fn read_all(&self) -> BinResult<Vec<ReadOutcome>> {
        let mut controller = self.open_session().await?;
        let registry = NodeRegistry::new();
        for identifier in &self.config.nodes {
            MonitoredNode::new(identifier.as_str(), &controller, &registry);
        }

        let mut outcomes = Vec::with_capacity(registry.len());
        for node in registry.all() {
            let result = node.read_var().await.map_err(|e| {
                e.log("read");
                e.to_string()
            });
            outcomes.push(ReadOutcome {
                node_identifier: node.identifier().to_string(),
                result,
            });
        }

        close_controller(&mut controller).await;
        Ok(outcomes)
    }

    /// Lists the references of `node_id`.
    pub async fn browse(&self, node_id: &NodeId) -> BinResult<Vec<BrowseReference>> {
        let mut controller = self.open_session().await?;
        let result = controller.browse(node_id).await;
        close_controller(&mut controller).await;
        Ok(result?)
    }
}

/// Disconnects, logging instead of failing.
async fn close_controller(controller: &mut SessionController) {
    if let Err(e) = controller.disconnect().await {
        e.log("disconnect");
    }
}

fn spawn_forwarder(
    node: &MonitoredNode,
    tx: mpsc::UnboundedSender<NodeEvent>,
    print_errors: bool,
) -> JoinHandle<()> {
    let mut listener = node.listener().subscribe();
    tokio::spawn(async move {
        while let Some(event) = listener.recv().await {
            if matches!(event, NodeEvent::Error(_)) && !print_errors {
                continue;
            }
            if tx.send(event).is_err() {
                break;
            }
        }
    })
}

fn write_event<W: Write>(out: &mut W, event: &NodeEvent) -> std::io::Result<()> {
    let line = match event {
        NodeEvent::Change(change) => serde_json::to_string(change),
        NodeEvent::Error(err) => serde_json::to_string(err),
    }
    .map_err(std::io::Error::other)?;
    writeln!(out, "{}", line)?;
    out.flush()
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`ClientRuntime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<PathBuf>,
    config: Option<UamonConfig>,
    transport: Option<Arc<dyn OpcUaTransport>>,
    silent: Option<bool>,
    print_errors: bool,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: UamonConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the transport; defaults to [`default_transport`].
    pub fn transport(mut self, transport: Arc<dyn OpcUaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the configured `silent` flag.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = Some(silent);
        self
    }

    /// Also writes error events.
    pub fn print_errors(mut self, enabled: bool) -> Self {
        self.print_errors = enabled;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> BinResult<ClientRuntime> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| BinError::config("No configuration provided"))?;
                ConfigLoader::new().load(&path).map_err(|e| {
                    BinError::from(e).with_context(format!("load {}", path.display()))
                })?
            }
        };

        if config.nodes.is_empty() {
            error!("No nodes configured");
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };

        let mut runtime = ClientRuntime::new(config, transport);
        if let Some(silent) = self.silent {
            runtime.silent = silent;
        }
        runtime.print_errors = self.print_errors;
        Ok(runtime)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uamon_opcua::client::mock::ops;
    use uamon_opcua::{OpcUaValue, ScriptedTransport};

    fn config(nodes: &[&str]) -> UamonConfig {
        UamonConfig {
            endpoint: "opc.tcp://host:4840".into(),
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn runtime(transport: &Arc<ScriptedTransport>, nodes: &[&str]) -> ClientRuntime {
        RuntimeBuilder::new()
            .config(config(nodes))
            .transport(transport.clone())
            .print_errors(true)
            .build()
            .unwrap()
    }

    async fn wait_for_items(transport: &ScriptedTransport, count: usize) {
        for _ in 0..100 {
            if transport.call_count(ops::CREATE_MONITORED_ITEM) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("monitored items were not created");
    }

    #[test]
    fn test_builder_requires_config() {
        assert!(RuntimeBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_validates_config() {
        let transport = Arc::new(ScriptedTransport::new());
        let result = RuntimeBuilder::new()
            .config(UamonConfig::default())
            .transport(transport)
            .build();
        assert_eq!(result.err().map(|e| e.exit_code()), Some(1));
    }

    #[tokio::test]
    async fn test_run_writes_change_lines() {
        let transport = Arc::new(ScriptedTransport::new());
        let runtime = runtime(&transport, &["ns=1;s=Var1", "ns=1;s=Var2"]);
        let shutdown = runtime.shutdown_handle();

        let emitter = transport.clone();
        tokio::spawn(async move {
            wait_for_items(&emitter, 2).await;
            emitter.emit_change(&NodeId::string(1, "Var1"), DataValue::new(OpcUaValue::Int32(42)));
            emitter.emit_error(&NodeId::string(1, "Var2"), "BadNodeIdUnknown");
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.initiate_shutdown();
        });

        let mut out = Vec::new();
        let summary = runtime.run(&mut out).await.unwrap();

        assert_eq!(summary.nodes_monitored, 2);
        assert_eq!(summary.changes_written, 1);
        assert_eq!(summary.errors_written, 1);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let change = lines.iter().find(|l| l.get("value").is_some()).unwrap();
        assert_eq!(change["nodeIdentifier"], "ns=1;s=Var1");
        assert_eq!(change["value"], "42");
        assert!(change["timestamp"].is_string());
        let error = lines.iter().find(|l| l.get("error").is_some()).unwrap();
        assert_eq!(error["nodeIdentifier"], "ns=1;s=Var2");

        assert_eq!(transport.call_count(ops::DISCONNECT), 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_setup_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ops::CREATE_SESSION, "BadTooManySessions");
        let runtime = runtime(&transport, &["ns=1;s=Var1"]);

        let err = runtime.run(&mut Vec::new()).await.unwrap_err();

        assert_eq!(err.opcua().map(|e| e.category()), Some("session"));
        assert_eq!(transport.call_count(ops::CREATE_MONITORED_ITEM), 0);
        assert_eq!(transport.call_count(ops::DISCONNECT), 1);
    }

    #[tokio::test]
    async fn test_run_disconnects_when_subscription_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ops::CREATE_SUBSCRIPTION, "BadTooManySubscriptions");
        let runtime = runtime(&transport, &["ns=1;s=Var1"]);

        let err = runtime.run(&mut Vec::new()).await.unwrap_err();

        assert_eq!(err.opcua().map(|e| e.category()), Some("subscription"));
        assert_eq!(
            transport.calls(),
            vec![
                ops::CONNECT,
                ops::CREATE_SESSION,
                ops::CREATE_SUBSCRIPTION,
                ops::DISCONNECT
            ]
        );
    }

    #[tokio::test]
    async fn test_read_all_disconnects_when_session_fails() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ops::CREATE_SESSION, "BadTooManySessions");
        let runtime = runtime(&transport, &["ns=1;s=Var1"]);

        assert!(runtime.read_all().await.is_err());
        assert_eq!(transport.call_count(ops::DISCONNECT), 1);
        assert_eq!(transport.call_count(ops::READ), 0);
    }

    #[tokio::test]
    async fn test_read_all_reports_each_node() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_value(&NodeId::string(1, "Var1"), DataValue::new(OpcUaValue::Double(1.5)));
        transport.fail_node(&NodeId::string(1, "Bad"), "BadNotReadable");
        let runtime = runtime(&transport, &["ns=1;s=Var1", "ns=1;s=Bad"]);

        let outcomes = runtime.read_all().await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].to_json()["value"], "1.5");
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[1].to_json()["error"].is_string());
        assert_eq!(transport.call_count(ops::CREATE_SUBSCRIPTION), 0);
    }

    #[tokio::test]
    async fn test_browse() {
        let transport = Arc::new(ScriptedTransport::new());
        let root = NodeId::root_folder();
        transport.set_references(
            &root,
            vec![BrowseReference::new(NodeId::numeric(0, 85), "Objects", "Objects", None)],
        );
        let runtime = runtime(&transport, &[]);

        let references = runtime.browse(&root).await.unwrap();

        assert_eq!(references.len(), 1);
        assert_eq!(references[0].browse_name, "Objects");
    }
}
