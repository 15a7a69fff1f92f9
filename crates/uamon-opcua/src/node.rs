// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored nodes.
//!
//! A [`MonitoredNode`] is one variable of interest. It snapshots the
//! controller's session and subscription when constructed, registers itself
//! in the [`NodeRegistry`], and once monitoring starts republishes every raw
//! notification of its monitored item on its own [`EventChannel`]:
//!
//! ```text
//! transport ──Changed(DataValue)──▶ normalize_change ──▶ "change" ChangeEvent
//!           ──Error(String)───────────────────────────▶ "error"  NodeErrorEvent
//! ```
//!
//! Monitoring failures are logged and isolated to the node: `start_monitoring`
//! still resolves and the node simply never produces events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::transport::{MonitoredItemEvent, MonitoredItemGrant, MonitoredItemRequest};
use crate::client::{Session, Subscription};
use crate::controller::SessionController;
use crate::error::{OpcUaError, OpcUaResult, PreconditionError, ReadError};
use crate::event::{ChangeEvent, EventChannel, NodeErrorEvent};
use crate::registry::NodeRegistry;
use crate::types::{AttributeId, DataValue, MonitoredItemSettings, NodeId};

// =============================================================================
// Normalization
// =============================================================================

/// Turns a raw data change into a [`ChangeEvent`].
///
/// Returns `None` when the notification carries no extractable scalar.
pub fn normalize_change(identifier: &str, value: &DataValue) -> Option<ChangeEvent> {
    value
        .scalar()
        .map(|scalar| ChangeEvent::now(identifier, scalar.to_string()))
}

// =============================================================================
// MonitoredItemHandle
// =============================================================================

/// A registered monitored item and its forwarding task.
struct MonitoredItemHandle {
    monitored_item_id: u32,
    revised_sampling_interval: Duration,
    revised_queue_size: u32,
    forwarder: JoinHandle<()>,
}

impl Drop for MonitoredItemHandle {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

// =============================================================================
// MonitoredNode
// =============================================================================

/// One monitored variable.
pub struct MonitoredNode {
    identifier: String,
    session: Option<Arc<Session>>,
    subscription: Option<Arc<Subscription>>,
    settings: MonitoredItemSettings,
    events: EventChannel,
    start_lock: Mutex<()>,
    item: OnceLock<MonitoredItemHandle>,
    monitoring: AtomicBool,
}

impl MonitoredNode {
    /// Creates a node bound to the controller's current session and
    /// subscription and registers it.
    ///
    /// Either handle may be absent; the operations that need it fail with a
    /// [`PreconditionError`] later.
    pub fn new(
        identifier: impl Into<String>,
        controller: &SessionController,
        registry: &NodeRegistry,
    ) -> Arc<Self> {
        let settings = controller.settings().monitoring.clone();
        let node = Arc::new(Self {
            identifier: identifier.into(),
            session: controller.session_snapshot(),
            subscription: controller.subscription_snapshot(),
            events: EventChannel::new(settings.channel_capacity()),
            settings,
            start_lock: Mutex::new(()),
            item: OnceLock::new(),
            monitoring: AtomicBool::new(false),
        });
        registry.register(node.clone());
        node
    }

    /// Returns the identifier as configured.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Parses the identifier.
    pub fn node_id(&self) -> OpcUaResult<NodeId> {
        self.identifier.parse()
    }

    /// Returns the node's event channel.
    pub fn listener(&self) -> &EventChannel {
        &self.events
    }

    /// Returns `true` once a monitored item is registered.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::Acquire)
    }

    /// Returns the server-assigned monitored item id.
    pub fn monitored_item_id(&self) -> Option<u32> {
        self.item.get().map(|h| h.monitored_item_id)
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Reads the node's current value.
    ///
    /// A response without a usable value is logged and still returned.
    pub async fn read_var(&self) -> OpcUaResult<DataValue> {
        let session = self
            .session
            .as_ref()
            .ok_or(PreconditionError::NoSession)?;
        let node_id = self.node_id()?;

        let value = session
            .read(&node_id, AttributeId::Value)
            .await
            .map_err(|e| match e {
                OpcUaError::Timeout(_) => e,
                cause => ReadError::failed_with(&self.identifier, cause).into(),
            })?;

        match value.value.as_ref().filter(|v| !v.is_null()) {
            Some(v) => info!(
                node_id = %self.identifier,
                value = %v,
                server_timestamp = ?value.server_timestamp.map(|t| t.to_rfc3339()),
                "Read value"
            ),
            None => {
                info!(node_id = %self.identifier, "Cannot access value");
                debug!(node_id = %self.identifier, raw = ?value, "Raw data value");
            }
        }
        Ok(value)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    /// Registers the node's monitored item and starts forwarding events.
    ///
    /// With `silent`, per-change diagnostics are not logged; events are
    /// published either way. A transport failure is logged and the call
    /// still succeeds without a monitored item.
    pub async fn start_monitoring(&self, silent: bool) -> OpcUaResult<()> {
        let subscription = self
            .subscription
            .as_ref()
            .ok_or(PreconditionError::NoSubscription)?;

        let _guard = self.start_lock.lock().await;
        if self.item.get().is_some() {
            return Err(PreconditionError::already_initialized("monitored item").into());
        }

        info!(node_id = %self.identifier, "Starting to monitor");

        let node_id = match self.node_id() {
            Ok(node_id) => node_id,
            Err(e) => {
                e.log("start_monitoring");
                return Ok(());
            }
        };

        let request = MonitoredItemRequest::value(node_id, self.settings.clone());
        let grant = match subscription.monitor(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                error!(
                    node_id = %self.identifier,
                    error_code = %e.error_code(),
                    error = %e,
                    "Could not monitor"
                );
                return Ok(());
            }
        };

        info!(
            node_id = %self.identifier,
            monitored_item_id = grant.monitored_item_id,
            "Successfully started to monitor"
        );

        let handle = self.spawn_forwarder(grant, silent);
        let _ = self.item.set(handle);
        self.monitoring.store(true, Ordering::Release);
        Ok(())
    }

    fn spawn_forwarder(&self, grant: MonitoredItemGrant, silent: bool) -> MonitoredItemHandle {
        let MonitoredItemGrant {
            monitored_item_id,
            revised_sampling_interval,
            revised_queue_size,
            notifications,
        } = grant;
        let forwarder = tokio::spawn(forward_notifications(
            self.identifier.clone(),
            notifications,
            self.events.clone(),
            silent,
        ));
        MonitoredItemHandle {
            monitored_item_id,
            revised_sampling_interval,
            revised_queue_size,
            forwarder,
        }
    }
}

async fn forward_notifications(
    identifier: String,
    mut notifications: mpsc::UnboundedReceiver<MonitoredItemEvent>,
    events: EventChannel,
    silent: bool,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            MonitoredItemEvent::Changed(value) => {
                if !silent {
                    info!(node_id = %identifier, "New change detected");
                }
                match normalize_change(&identifier, &value) {
                    Some(event) => {
                        if !silent {
                            info!(node_id = %identifier, value = %event.value, "Change");
                        }
                        events.publish_change(event);
                    }
                    None if !silent => {
                        warn!(node_id = %identifier, raw = ?value, "No scalar in change, dropped");
                    }
                    None => {}
                }
            }
            MonitoredItemEvent::Error(message) => {
                error!(node_id = %identifier, error = %message, "Error while monitoring");
                events.publish_error(NodeErrorEvent {
                    node_identifier: identifier.clone(),
                    error: message,
                });
            }
        }
    }
    debug!(node_id = %identifier, "Monitored item notifications closed");
}

impl fmt::Debug for MonitoredNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let item = self.item.get();
        f.debug_struct("MonitoredNode")
            .field("identifier", &self.identifier)
            .field("has_session", &self.session.is_some())
            .field("has_subscription", &self.subscription.is_some())
            .field("monitored_item_id", &item.map(|h| h.monitored_item_id))
            .field(
                "revised_sampling_interval",
                &item.map(|h| h.revised_sampling_interval),
            )
            .field("revised_queue_size", &item.map(|h| h.revised_queue_size))
            .field("events", &self.events)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{ops, ScriptedTransport};
    use crate::event::NodeEvent;
    use crate::types::OpcUaValue;

    async fn subscribed(transport: &Arc<ScriptedTransport>) -> SessionController {
        let mut controller = SessionController::new(
            Some("opc.tcp://host:4840".to_string()),
            Some(transport.clone()),
        );
        controller.start().await.unwrap();
        controller
    }

    async fn next_event(listener: &mut crate::event::EventListener) -> NodeEvent {
        tokio::time::timeout(Duration::from_secs(1), listener.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[test]
    fn test_normalize_change() {
        let event = normalize_change("ns=1;s=Var1", &DataValue::new(OpcUaValue::Int32(42))).unwrap();
        assert_eq!(event.node_identifier, "ns=1;s=Var1");
        assert_eq!(event.value, "42");

        assert!(normalize_change("ns=1;s=Var1", &DataValue::empty()).is_none());
        assert!(normalize_change("ns=1;s=Var1", &DataValue::new(OpcUaValue::Null)).is_none());
        assert!(
            normalize_change("ns=1;s=Var1", &DataValue::new(OpcUaValue::Array(vec![]))).is_none()
        );
    }

    #[tokio::test]
    async fn test_change_is_published() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let registry = NodeRegistry::new();
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &registry);
        let mut listener = node.listener().subscribe();

        node.start_monitoring(true).await.unwrap();
        assert!(node.is_monitoring());
        assert_eq!(node.monitored_item_id(), Some(1));

        transport.emit_change(&NodeId::string(1, "Var1"), DataValue::new(OpcUaValue::Int32(42)));

        match next_event(&mut listener).await {
            NodeEvent::Change(e) => {
                assert_eq!(e.node_identifier, "ns=1;s=Var1");
                assert_eq!(e.value, "42");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_monitoring_request_parameters() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        node.start_monitoring(false).await.unwrap();

        let request = &transport.item_requests()[0];
        assert_eq!(request.node_id, NodeId::string(1, "Var1"));
        assert_eq!(request.attribute, AttributeId::Value);
        assert_eq!(request.settings.sampling_interval, Duration::from_millis(100));
        assert_eq!(request.settings.queue_size, 10);
        assert!(request.settings.discard_oldest);
    }

    #[tokio::test]
    async fn test_malformed_change_is_dropped() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());
        let mut listener = node.listener().subscribe();
        node.start_monitoring(false).await.unwrap();

        let id = NodeId::string(1, "Var1");
        transport.emit_change(&id, DataValue::empty());
        transport.emit_change(&id, DataValue::new(OpcUaValue::Boolean(true)));

        match next_event(&mut listener).await {
            NodeEvent::Change(e) => assert_eq!(e.value, "true"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(listener.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_error_notification_is_published() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());
        let mut listener = node.listener().subscribe();
        node.start_monitoring(true).await.unwrap();

        let id = NodeId::string(1, "Var1");
        transport.emit_error(&id, "BadNodeIdUnknown");
        transport.emit_change(&id, DataValue::new(OpcUaValue::Int32(1)));

        assert_eq!(
            next_event(&mut listener).await,
            NodeEvent::Error(NodeErrorEvent {
                node_identifier: "ns=1;s=Var1".into(),
                error: "BadNodeIdUnknown".into(),
            })
        );
        // Monitoring continues after an error.
        assert!(matches!(next_event(&mut listener).await, NodeEvent::Change(_)));
    }

    #[tokio::test]
    async fn test_monitoring_failure_is_not_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ops::CREATE_MONITORED_ITEM, "BadTooManyMonitoredItems");
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        node.start_monitoring(true).await.unwrap();

        assert!(!node.is_monitoring());
        assert!(node.monitored_item_id().is_none());
    }

    #[tokio::test]
    async fn test_unparsable_identifier_is_not_fatal() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("not-a-node", &controller, &NodeRegistry::new());

        node.start_monitoring(true).await.unwrap();

        assert!(!node.is_monitoring());
        assert_eq!(transport.call_count(ops::CREATE_MONITORED_ITEM), 0);
        assert_eq!(node.read_var().await.unwrap_err().category(), "configuration");
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        node.start_monitoring(true).await.unwrap();
        let err = node.start_monitoring(true).await.unwrap_err();

        assert!(matches!(
            err,
            OpcUaError::Precondition(PreconditionError::AlreadyInitialized { .. })
        ));
        assert_eq!(transport.call_count(ops::CREATE_MONITORED_ITEM), 1);
    }

    #[tokio::test]
    async fn test_operations_without_handles() {
        let controller = SessionController::new(None, None);
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        assert!(matches!(
            node.read_var().await.unwrap_err(),
            OpcUaError::Precondition(PreconditionError::NoSession)
        ));
        assert!(matches!(
            node.start_monitoring(false).await.unwrap_err(),
            OpcUaError::Precondition(PreconditionError::NoSubscription)
        ));
    }

    #[tokio::test]
    async fn test_read_var() {
        let transport = Arc::new(ScriptedTransport::new());
        let id = NodeId::string(1, "Var1");
        transport.set_value(&id, DataValue::new(OpcUaValue::Double(21.5)));
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        let value = node.read_var().await.unwrap();
        assert_eq!(value.value, Some(OpcUaValue::Double(21.5)));

        // A node without a value is reported, not failed.
        let empty = MonitoredNode::new("ns=1;s=Missing", &controller, &NodeRegistry::new());
        assert!(empty.read_var().await.unwrap().value.is_none());
    }

    #[tokio::test]
    async fn test_read_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(ops::READ, "BadNotReadable");
        let controller = subscribed(&transport).await;
        let node = MonitoredNode::new("ns=1;s=Var1", &controller, &NodeRegistry::new());

        let err = node.read_var().await.unwrap_err();
        assert_eq!(err.category(), "read");
        assert!(err.to_string().contains("ns=1;s=Var1"));
    }
}
