// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport abstraction layer.
//!
//! The transport owns the secure channel and the protocol encoding. The rest
//! of the crate only sees the primitives below. Notifications the server
//! pushes asynchronously (keep-alives, termination, data changes, item
//! errors) come back as unbounded channels inside the grant returned by the
//! call that created the server-side object.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::browse::BrowseReference;
use crate::error::OpcUaResult;
use crate::types::{
    AttributeId, DataValue, MonitoredItemSettings, NodeId, SubscriptionSettings,
    TimestampsToReturn,
};

// =============================================================================
// TransportState
// =============================================================================

/// Connection state of the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Transport is not connected.
    #[default]
    Disconnected,

    /// Transport is establishing connection.
    Connecting,

    /// Transport is connected and ready.
    Connected,

    /// Transport connection has failed.
    Failed,
}

impl TransportState {
    /// Returns `true` if the transport is connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if the transport has failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Server-side session identity returned by `create_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier used in logs.
    pub session_id: String,

    /// Session name sent to the server.
    pub session_name: String,

    /// Endpoint the session runs on.
    pub endpoint: String,

    /// Session timeout granted by the server.
    pub revised_timeout: Duration,
}

// =============================================================================
// Subscription
// =============================================================================

/// Subscription-level notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// Publish cycle with no data; the subscription is alive.
    KeepAlive,

    /// The server ended the subscription.
    Terminated {
        /// Server or transport provided reason.
        reason: String,
    },
}

/// Result of a successful `create_subscription`.
#[derive(Debug)]
pub struct SubscriptionGrant {
    /// Server-assigned subscription id.
    pub subscription_id: u32,

    /// Publishing interval the server granted.
    pub revised_publishing_interval: Duration,

    /// Lifetime count the server granted.
    pub revised_lifetime_count: u32,

    /// Keep-alive count the server granted.
    pub revised_keepalive_count: u32,

    /// Lifecycle notifications for this subscription.
    pub events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

// =============================================================================
// Monitored Items
// =============================================================================

/// Request for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRequest {
    /// Node to monitor.
    pub node_id: NodeId,

    /// Attribute to monitor.
    pub attribute: AttributeId,

    /// Sampling and queueing parameters.
    pub settings: MonitoredItemSettings,

    /// Timestamps to attach to notifications.
    pub timestamps: TimestampsToReturn,
}

impl MonitoredItemRequest {
    /// Creates a request for the Value attribute with both timestamps.
    pub fn value(node_id: NodeId, settings: MonitoredItemSettings) -> Self {
        Self {
            node_id,
            attribute: AttributeId::Value,
            settings,
            timestamps: TimestampsToReturn::Both,
        }
    }
}

/// Raw per-item notification.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoredItemEvent {
    /// The monitored value changed.
    Changed(DataValue),

    /// The item reported an error.
    Error(String),
}

/// Result of a successful `create_monitored_item`.
#[derive(Debug)]
pub struct MonitoredItemGrant {
    /// Server-assigned monitored item id.
    pub monitored_item_id: u32,

    /// Sampling interval the server granted.
    pub revised_sampling_interval: Duration,

    /// Queue size the server granted.
    pub revised_queue_size: u32,

    /// Notifications for this item, in server order.
    pub notifications: mpsc::UnboundedReceiver<MonitoredItemEvent>,
}

// =============================================================================
// OpcUaTransport Trait
// =============================================================================

/// Abstract transport trait for OPC UA communication.
///
/// Methods take `&self`; implementations keep their connection state behind
/// interior mutability so one transport can be shared as
/// `Arc<dyn OpcUaTransport>` between the controller, the session and the
/// subscription handles.
#[async_trait]
pub trait OpcUaTransport: Send + Sync {
    // =========================================================================
    // Connection Management
    // =========================================================================

    /// Opens the connection to `endpoint`.
    async fn connect(&self, endpoint: &str) -> OpcUaResult<()>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self) -> OpcUaResult<()>;

    /// Returns the current transport state.
    fn state(&self) -> TransportState;

    /// Returns `true` if connected.
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    // =========================================================================
    // Session / Subscription
    // =========================================================================

    /// Creates and activates a session on the open connection.
    async fn create_session(&self) -> OpcUaResult<SessionInfo>;

    /// Creates a subscription on `session`.
    async fn create_subscription(
        &self,
        session: &SessionInfo,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionGrant>;

    /// Creates one monitored item in `subscription_id`.
    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: &MonitoredItemRequest,
    ) -> OpcUaResult<MonitoredItemGrant>;

    // =========================================================================
    // Services
    // =========================================================================

    /// Reads one attribute of one node.
    async fn read(
        &self,
        session: &SessionInfo,
        node_id: &NodeId,
        attribute: AttributeId,
    ) -> OpcUaResult<DataValue>;

    /// Returns the forward hierarchical references of `node_id`.
    async fn browse(
        &self,
        session: &SessionInfo,
        node_id: &NodeId,
    ) -> OpcUaResult<Vec<BrowseReference>>;

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Returns a display name for logging.
    fn display_name(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_state() {
        assert!(TransportState::Connected.is_connected());
        assert!(!TransportState::Disconnected.is_connected());
        assert!(TransportState::Failed.is_failed());
        assert_eq!(TransportState::Connecting.to_string(), "connecting");
        assert_eq!(TransportState::default(), TransportState::Disconnected);
    }

    #[test]
    fn test_value_request_defaults() {
        let request =
            MonitoredItemRequest::value(NodeId::string(1, "Var1"), MonitoredItemSettings::default());
        assert_eq!(request.attribute, AttributeId::Value);
        assert_eq!(request.timestamps, TimestampsToReturn::Both);
        assert_eq!(request.settings.queue_size, 10);
    }
}
