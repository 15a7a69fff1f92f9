// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built test data for consistent and reproducible testing.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use uamon_opcua::{
    ControllerSettings, DataValue, MonitoredItemSettings, NodeId, OpcUaValue,
    SubscriptionSettings,
};

/// Endpoint used by every scripted scenario.
pub const ENDPOINT: &str = "opc.tcp://host:4840";

// =============================================================================
// Node Fixtures
// =============================================================================

/// Fixture providing node identifiers.
pub struct NodeFixtures;

impl NodeFixtures {
    /// A string node in namespace 1.
    pub const VAR1: &'static str = "ns=1;s=Var1";

    /// A second string node in namespace 1.
    pub const VAR2: &'static str = "ns=1;s=Var2";

    /// A numeric node (Server_ServerStatus_CurrentTime).
    pub const CURRENT_TIME: &'static str = "i=2258";

    /// An identifier that does not parse.
    pub const MALFORMED: &'static str = "ns=1;q=Var1";

    /// `count` distinct string identifiers in namespace 2.
    pub fn batch(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("ns=2;s=Tag{:03}", i)).collect()
    }

    /// Parses a fixture identifier.
    pub fn id(identifier: &str) -> NodeId {
        identifier
            .parse()
            .unwrap_or_else(|e| panic!("fixture '{}' must parse: {}", identifier, e))
    }
}

// =============================================================================
// Value Fixtures
// =============================================================================

/// Fixture providing data values.
pub struct ValueFixtures;

impl ValueFixtures {
    /// A good Int32 value.
    pub fn int(value: i32) -> DataValue {
        DataValue::new(OpcUaValue::Int32(value))
    }

    /// A good Double value with a fixed server timestamp.
    pub fn double(value: f64) -> DataValue {
        DataValue::new(OpcUaValue::Double(value))
            .with_server_timestamp(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap())
    }

    /// A good String value.
    pub fn string(value: &str) -> DataValue {
        DataValue::new(OpcUaValue::String(value.to_string()))
    }

    /// A notification without any value.
    pub fn missing() -> DataValue {
        DataValue::empty()
    }

    /// A notification carrying an array instead of a scalar.
    pub fn array() -> DataValue {
        DataValue::new(OpcUaValue::Array(vec![OpcUaValue::Int32(1), OpcUaValue::Int32(2)]))
    }
}

// =============================================================================
// Settings Fixtures
// =============================================================================

/// Fixture providing controller settings.
pub struct SettingsFixtures;

impl SettingsFixtures {
    /// Default settings with a short request timeout.
    pub fn short_timeout(timeout: Duration) -> ControllerSettings {
        ControllerSettings {
            request_timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Settings with a custom monitored item queue size.
    pub fn queue_size(queue_size: u32) -> ControllerSettings {
        ControllerSettings {
            monitoring: MonitoredItemSettings {
                queue_size,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Subscription settings with a fast publishing interval.
    pub fn fast_subscription() -> SubscriptionSettings {
        SubscriptionSettings {
            publishing_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }
}
