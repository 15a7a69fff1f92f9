// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA telemetry client core for uamon.
//!
//! This crate establishes a connection, a session and a subscription against
//! one OPC UA server, then turns data-change notifications of individual
//! variables into per-node events that application code listens to.
//!
//! # Components
//!
//! - [`SessionController`]: connect → session → subscription lifecycle,
//!   address-space browsing, keep-alive and termination relay
//! - [`MonitoredNode`]: one variable; one-off reads and continuous monitoring
//! - [`NodeRegistry`]: every constructed node, in construction order
//! - [`EventChannel`]: per-node `change` / `error` fan-out
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Configuration - Missing endpoint, malformed node identifiers
//! ├── Connection    - Endpoint unreachable or connection lost
//! ├── Session       - Session creation failures
//! ├── Subscription  - Subscription creation or termination
//! ├── Precondition  - Operation invoked before its prerequisite
//! ├── Read          - One-off read failures
//! ├── Browse        - Address-space browsing failures
//! ├── Monitoring    - Monitored item creation failures
//! └── Timeout       - Bounded operations that did not complete
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uamon_opcua::{MonitoredNode, NodeRegistry, RealTransport, SessionController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(RealTransport::new(Default::default()));
//!     let mut controller =
//!         SessionController::new(Some("opc.tcp://localhost:4840".into()), Some(transport));
//!     controller.start().await?;
//!
//!     let registry = NodeRegistry::new();
//!     let node = MonitoredNode::new("ns=1;s=Temperature", &controller, &registry);
//!     node.start_monitoring(true).await?;
//!
//!     node.listener().on_change(|event| println!("{:?}", event));
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browse;
pub mod client;
pub mod controller;
pub mod error;
pub mod event;
pub mod node;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use error::{
    BoxError, BrowseError, ConfigurationError, ConnectionError, ErrorCode, ErrorSeverity,
    MonitoringError, OpcUaError, OpcUaResult, PreconditionError, ReadError, SessionError,
    SubscriptionError, TimeoutError,
};

pub use types::{
    AttributeId, DataValue, MonitoredItemSettings, NodeId, NodeIdentifier, OpcUaValue,
    SubscriptionSettings, TimestampsToReturn,
};

pub use browse::{BrowseReference, NodeClass};

// Re-export client types
pub use client::{
    MonitoredItemEvent, MonitoredItemGrant, MonitoredItemRequest, OpcUaTransport,
    RevisedParameters, Session, SessionInfo, Subscription, SubscriptionEvent, SubscriptionGrant,
    SubscriptionState, TransportState,
};

// Re-export real transport when feature is enabled
#[cfg(feature = "real-transport")]
pub use client::{RealTransport, RealTransportConfig};

#[cfg(any(test, feature = "test-support"))]
pub use client::ScriptedTransport;

pub use controller::{ControllerSettings, ControllerState, LifecycleSignal, SessionController};
pub use event::{ChangeEvent, ChannelStats, EventChannel, EventListener, NodeErrorEvent, NodeEvent};
pub use node::{normalize_change, MonitoredNode};
pub use registry::NodeRegistry;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
