// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Scripted in-memory transport for tests.
//!
//! [`ScriptedTransport`] records every call, serves values and browse
//! results configured up front, fails or stalls selected operations, and
//! lets the test push server-side notifications (keep-alive, termination,
//! data change, item error) into the channels it handed out.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::browse::BrowseReference;
use crate::client::transport::{
    MonitoredItemEvent, MonitoredItemGrant, MonitoredItemRequest, OpcUaTransport, SessionInfo,
    SubscriptionEvent, SubscriptionGrant, TransportState,
};
use crate::error::{
    BrowseError, ConnectionError, MonitoringError, OpcUaError, OpcUaResult, ReadError,
    SessionError, SubscriptionError,
};
use crate::types::{AttributeId, DataValue, NodeId, SubscriptionSettings};

/// Operation names accepted by [`ScriptedTransport::fail`] and
/// [`ScriptedTransport::stall`].
pub mod ops {
    /// `connect`.
    pub const CONNECT: &str = "connect";
    /// `disconnect`.
    pub const DISCONNECT: &str = "disconnect";
    /// `create_session`.
    pub const CREATE_SESSION: &str = "create_session";
    /// `create_subscription`.
    pub const CREATE_SUBSCRIPTION: &str = "create_subscription";
    /// `create_monitored_item`.
    pub const CREATE_MONITORED_ITEM: &str = "create_monitored_item";
    /// `read`.
    pub const READ: &str = "read";
    /// `browse`.
    pub const BROWSE: &str = "browse";
}

#[derive(Default)]
struct ScriptState {
    state: TransportState,
    endpoint: Option<String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, String>,
    node_failures: HashMap<NodeId, String>,
    stalls: HashSet<&'static str>,
    values: HashMap<NodeId, DataValue>,
    references: HashMap<NodeId, Vec<BrowseReference>>,
    next_session: u32,
    next_subscription: u32,
    next_item: u32,
    subscription_requests: Vec<SubscriptionSettings>,
    item_requests: Vec<MonitoredItemRequest>,
    subscription_senders: HashMap<u32, mpsc::UnboundedSender<SubscriptionEvent>>,
    item_senders: HashMap<NodeId, Vec<mpsc::UnboundedSender<MonitoredItemEvent>>>,
}

/// Scripted transport.
#[derive(Default)]
pub struct ScriptedTransport {
    inner: Mutex<ScriptState>,
}

impl ScriptedTransport {
    /// Creates a transport in the disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Makes every call of `operation` fail with `message`.
    pub fn fail(&self, operation: &'static str, message: impl Into<String>) {
        self.inner.lock().failures.insert(operation, message.into());
    }

    /// Makes monitored item creation and reads fail for one node only.
    pub fn fail_node(&self, node_id: &NodeId, message: impl Into<String>) {
        self.inner
            .lock()
            .node_failures
            .insert(node_id.clone(), message.into());
    }

    /// Removes a configured failure.
    pub fn clear_failure(&self, operation: &'static str) {
        self.inner.lock().failures.remove(operation);
    }

    /// Makes every call of `operation` hang forever.
    pub fn stall(&self, operation: &'static str) {
        self.inner.lock().stalls.insert(operation);
    }

    /// Sets the value returned by reads of `node_id`.
    pub fn set_value(&self, node_id: &NodeId, value: DataValue) {
        self.inner.lock().values.insert(node_id.clone(), value);
    }

    /// Sets the references returned by browsing `node_id`.
    pub fn set_references(&self, node_id: &NodeId, references: Vec<BrowseReference>) {
        self.inner
            .lock()
            .references
            .insert(node_id.clone(), references);
    }

    // =========================================================================
    // Server-side notifications
    // =========================================================================

    /// Sends a keep-alive on every open subscription.
    pub fn emit_keepalive(&self) -> usize {
        self.emit_subscription(SubscriptionEvent::KeepAlive)
    }

    /// Terminates every open subscription.
    pub fn emit_terminated(&self, reason: impl Into<String>) -> usize {
        self.emit_subscription(SubscriptionEvent::Terminated {
            reason: reason.into(),
        })
    }

    /// Sends a data change to every item monitoring `node_id`.
    pub fn emit_change(&self, node_id: &NodeId, value: DataValue) -> usize {
        self.emit_item(node_id, MonitoredItemEvent::Changed(value))
    }

    /// Sends an item error to every item monitoring `node_id`.
    pub fn emit_error(&self, node_id: &NodeId, message: impl Into<String>) -> usize {
        self.emit_item(node_id, MonitoredItemEvent::Error(message.into()))
    }

    /// Closes the notification channels of every item monitoring `node_id`.
    pub fn close_items(&self, node_id: &NodeId) {
        self.inner.lock().item_senders.remove(node_id);
    }

    fn emit_subscription(&self, event: SubscriptionEvent) -> usize {
        let inner = self.inner.lock();
        inner
            .subscription_senders
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    fn emit_item(&self, node_id: &NodeId, event: MonitoredItemEvent) -> usize {
        let inner = self.inner.lock();
        inner
            .item_senders
            .get(node_id)
            .map(|senders| {
                senders
                    .iter()
                    .filter(|tx| tx.send(event.clone()).is_ok())
                    .count()
            })
            .unwrap_or(0)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns every call made, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Returns how often `operation` was called.
    pub fn call_count(&self, operation: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    /// Returns the endpoint of the last connect.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.lock().endpoint.clone()
    }

    /// Returns the settings of every subscription request.
    pub fn subscription_requests(&self) -> Vec<SubscriptionSettings> {
        self.inner.lock().subscription_requests.clone()
    }

    /// Returns every monitored item request.
    pub fn item_requests(&self) -> Vec<MonitoredItemRequest> {
        self.inner.lock().item_requests.clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Records the call and applies scripted failure or stall.
    async fn enter(&self, operation: &'static str) -> Result<(), String> {
        let (failure, stalled) = {
            let mut inner = self.inner.lock();
            inner.calls.push(operation.to_string());
            (
                inner.failures.get(operation).cloned(),
                inner.stalls.contains(operation),
            )
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        match failure {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    fn require_connected(&self) -> OpcUaResult<()> {
        if self.inner.lock().state.is_connected() {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    fn node_failure(&self, node_id: &NodeId) -> Option<String> {
        self.inner.lock().node_failures.get(node_id).cloned()
    }
}

#[async_trait]
impl OpcUaTransport for ScriptedTransport {
    async fn connect(&self, endpoint: &str) -> OpcUaResult<()> {
        self.inner.lock().state = TransportState::Connecting;
        if let Err(message) = self.enter(ops::CONNECT).await {
            self.inner.lock().state = TransportState::Failed;
            return Err(ConnectionError::endpoint_not_found(endpoint, message).into());
        }
        let mut inner = self.inner.lock();
        inner.state = TransportState::Connected;
        inner.endpoint = Some(endpoint.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        self.enter(ops::DISCONNECT)
            .await
            .map_err(|m| ConnectionError::closed(Some(m)))?;
        let mut inner = self.inner.lock();
        inner.state = TransportState::Disconnected;
        inner.subscription_senders.clear();
        inner.item_senders.clear();
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    async fn create_session(&self) -> OpcUaResult<SessionInfo> {
        self.enter(ops::CREATE_SESSION)
            .await
            .map_err(SessionError::creation_failed)?;
        self.require_connected()?;

        let mut inner = self.inner.lock();
        inner.next_session += 1;
        Ok(SessionInfo {
            session_id: format!("ns=1;i={}", inner.next_session),
            session_name: "uamon".to_string(),
            endpoint: inner.endpoint.clone().unwrap_or_default(),
            revised_timeout: Duration::from_secs(60),
        })
    }

    async fn create_subscription(
        &self,
        _session: &SessionInfo,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionGrant> {
        self.enter(ops::CREATE_SUBSCRIPTION)
            .await
            .map_err(SubscriptionError::creation_failed)?;
        self.require_connected()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_subscription += 1;
        let subscription_id = inner.next_subscription;
        inner.subscription_requests.push(settings.clone());
        inner.subscription_senders.insert(subscription_id, tx);

        Ok(SubscriptionGrant {
            subscription_id,
            revised_publishing_interval: settings.publishing_interval,
            revised_lifetime_count: settings.lifetime_count,
            revised_keepalive_count: settings.keepalive_count,
            events: rx,
        })
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: &MonitoredItemRequest,
    ) -> OpcUaResult<MonitoredItemGrant> {
        let node = request.node_id.to_string();
        self.enter(ops::CREATE_MONITORED_ITEM)
            .await
            .map_err(|m| MonitoringError::item_creation_failed(&node, m))?;
        if let Some(message) = self.node_failure(&request.node_id) {
            return Err(MonitoringError::item_creation_failed(node, message).into());
        }
        self.require_connected()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.subscription_senders.contains_key(&subscription_id) {
            return Err(SubscriptionError::not_found(subscription_id).into());
        }
        inner.next_item += 1;
        let monitored_item_id = inner.next_item;
        inner.item_requests.push(request.clone());
        inner
            .item_senders
            .entry(request.node_id.clone())
            .or_default()
            .push(tx);

        Ok(MonitoredItemGrant {
            monitored_item_id,
            revised_sampling_interval: request.settings.sampling_interval,
            revised_queue_size: request.settings.queue_size,
            notifications: rx,
        })
    }

    async fn read(
        &self,
        _session: &SessionInfo,
        node_id: &NodeId,
        _attribute: AttributeId,
    ) -> OpcUaResult<DataValue> {
        self.enter(ops::READ)
            .await
            .map_err(|m| ReadError::failed(node_id.to_string(), m))?;
        if let Some(message) = self.node_failure(node_id) {
            return Err(ReadError::failed(node_id.to_string(), message).into());
        }
        self.require_connected()?;

        Ok(self
            .inner
            .lock()
            .values
            .get(node_id)
            .cloned()
            .unwrap_or_else(DataValue::empty))
    }

    async fn browse(
        &self,
        _session: &SessionInfo,
        node_id: &NodeId,
    ) -> OpcUaResult<Vec<BrowseReference>> {
        self.enter(ops::BROWSE)
            .await
            .map_err(|m| BrowseError::failed(node_id.to_string(), m))?;
        self.require_connected()?;

        Ok(self
            .inner
            .lock()
            .references
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    fn display_name(&self) -> String {
        "ScriptedTransport".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MonitoredItemSettings, OpcUaValue};

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let transport = ScriptedTransport::new();
        transport.connect("opc.tcp://localhost:4840").await.unwrap();
        let session = transport.create_session().await.unwrap();
        transport
            .create_subscription(&session, &SubscriptionSettings::default())
            .await
            .unwrap();

        assert_eq!(
            transport.calls(),
            vec!["connect", "create_session", "create_subscription"]
        );
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let transport = ScriptedTransport::new();
        transport.fail(ops::CONNECT, "host unreachable");

        let err = transport.connect("opc.tcp://nowhere:4840").await.unwrap_err();
        assert!(err.to_string().contains("host unreachable"));
        assert_eq!(transport.state(), TransportState::Failed);
    }

    #[tokio::test]
    async fn test_change_reaches_item_channel() {
        let transport = ScriptedTransport::new();
        transport.connect("opc.tcp://localhost:4840").await.unwrap();
        let session = transport.create_session().await.unwrap();
        let sub = transport
            .create_subscription(&session, &SubscriptionSettings::default())
            .await
            .unwrap();

        let node = NodeId::string(1, "Var1");
        let request = MonitoredItemRequest::value(node.clone(), MonitoredItemSettings::default());
        let mut grant = transport
            .create_monitored_item(sub.subscription_id, &request)
            .await
            .unwrap();

        assert_eq!(transport.emit_change(&node, DataValue::new(OpcUaValue::Int32(1))), 1);
        assert_eq!(
            grant.notifications.recv().await,
            Some(MonitoredItemEvent::Changed(DataValue::new(OpcUaValue::Int32(1))))
        );
    }

    #[tokio::test]
    async fn test_session_requires_connection() {
        let transport = ScriptedTransport::new();
        let err = transport.create_session().await.unwrap_err();
        assert_eq!(err.category(), "connection");
    }
}
