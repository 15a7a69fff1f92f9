// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA value and addressing types.
//!
//! - **NodeId**: the four OPC UA node identifier kinds with parsing
//! - **OpcUaValue**: transport-neutral variant value with stable rendering
//! - **DataValue**: a value plus status code and timestamps
//! - **SubscriptionSettings / MonitoredItemSettings**: request parameters
//!
//! # Examples
//!
//! ```
//! use uamon_opcua::types::{NodeId, OpcUaValue};
//!
//! let node: NodeId = "ns=1;s=Var1".parse().unwrap();
//! assert_eq!(node.namespace_index, 1);
//! assert_eq!(OpcUaValue::Int32(42).to_string(), "42");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigurationError, OpcUaError};

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA Node Identifier.
///
/// A namespace index plus a numeric, string, GUID or opaque identifier.
///
/// # Examples
///
/// ```
/// use uamon_opcua::types::NodeId;
///
/// let numeric = NodeId::numeric(0, 2258);
/// let parsed: NodeId = "i=2258".parse().unwrap();
/// assert_eq!(numeric, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    /// The standard `RootFolder` object (`i=84`).
    pub const ROOT_FOLDER: u32 = 84;

    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Returns the `RootFolder` node.
    pub fn root_folder() -> Self {
        Self::numeric(0, Self::ROOT_FOLDER)
    }

    /// Returns `true` if this is a numeric identifier in namespace 0.
    pub const fn is_standard(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(_))
    }

    /// Formats as `ns=<namespace>;{i|s|g|b}=<identifier>`.
    ///
    /// The namespace prefix is omitted for namespace 0.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = OpcUaError;

    /// Parses `ns=2;i=1001`, `ns=2;s=Name`, `ns=2;g=<uuid>`, `ns=2;b=<base64>`
    /// or any of those without the `ns=` prefix (namespace 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| {
            OpcUaError::from(ConfigurationError::invalid_node_id(s, reason))
        };

        if s.is_empty() {
            return Err(invalid("Empty node id".into()));
        }

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, id) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("Missing identifier after namespace".into()))?;
                let ns: u16 = ns
                    .parse()
                    .map_err(|_| invalid("Invalid namespace index".into()))?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(
                id.parse()
                    .map_err(|_| invalid("Invalid numeric identifier".into()))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid("Empty string identifier".into()));
            }
            NodeIdentifier::String(id.to_string())
        } else if let Some(id) = identifier_part.strip_prefix("g=") {
            NodeIdentifier::Guid(
                Uuid::parse_str(id).map_err(|e| invalid(format!("Invalid GUID: {}", e)))?,
            )
        } else if let Some(id) = identifier_part.strip_prefix("b=") {
            NodeIdentifier::Opaque(
                BASE64
                    .decode(id)
                    .map_err(|e| invalid(format!("Invalid base64: {}", e)))?,
            )
        } else {
            return Err(invalid(
                "Unknown identifier type. Expected i=, s=, g=, or b=".into(),
            ));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

// =============================================================================
// AttributeId / TimestampsToReturn
// =============================================================================

/// Node attributes this client reads or monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttributeId {
    /// NodeId attribute.
    NodeId,
    /// BrowseName attribute.
    BrowseName,
    /// DisplayName attribute.
    DisplayName,
    /// Value attribute.
    #[default]
    Value,
}

impl AttributeId {
    /// Returns the numeric attribute id from the OPC UA address space model.
    pub const fn id(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::Value => 13,
        }
    }
}

/// Which timestamps the server attaches to returned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    /// Source timestamp only.
    Source,
    /// Server timestamp only.
    Server,
    /// Both timestamps.
    #[default]
    Both,
    /// No timestamps.
    Neither,
}

// =============================================================================
// OpcUaValue
// =============================================================================

/// OPC UA variant value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OpcUaValue {
    /// Boolean value.
    Boolean(bool),
    /// Signed byte.
    SByte(i8),
    /// Unsigned byte.
    Byte(u8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit double.
    Double(f64),
    /// String value.
    String(String),
    /// Date/time value.
    DateTime(DateTime<Utc>),
    /// GUID value.
    Guid(Uuid),
    /// Byte string.
    ByteString(Vec<u8>),
    /// Array of values.
    Array(Vec<OpcUaValue>),
    /// Null value.
    #[default]
    Null,
}

impl OpcUaValue {
    /// Returns `true` if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for single, non-null values.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Null | Self::Array(_))
    }

    /// Returns the variant type name.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "Boolean",
            Self::SByte(_) => "SByte",
            Self::Byte(_) => "Byte",
            Self::Int16(_) => "Int16",
            Self::UInt16(_) => "UInt16",
            Self::Int32(_) => "Int32",
            Self::UInt32(_) => "UInt32",
            Self::Int64(_) => "Int64",
            Self::UInt64(_) => "UInt64",
            Self::Float(_) => "Float",
            Self::Double(_) => "Double",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Guid(_) => "Guid",
            Self::ByteString(_) => "ByteString",
            Self::Array(_) => "Array",
            Self::Null => "Null",
        }
    }

}

/// Renders the value the way it is published in change events.
///
/// Numbers use Rust's shortest round-trip formatting (`42.0_f64` renders as
/// `42`), date/times are RFC 3339 in UTC and byte strings are base64.
impl fmt::Display for OpcUaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::SByte(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::DateTime(v) => f.write_str(&v.to_rfc3339()),
            Self::Guid(v) => write!(f, "{}", v),
            Self::ByteString(v) => f.write_str(&BASE64.encode(v)),
            Self::Array(v) => {
                f.write_str("[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Null => f.write_str("null"),
        }
    }
}

// =============================================================================
// DataValue
// =============================================================================

/// A value as returned by a read or a data change notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value; `None` when the server sent no value at all.
    pub value: Option<OpcUaValue>,

    /// OPC UA status code (`0` = Good).
    pub status_code: u32,

    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Timestamp assigned by the server.
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// Creates a good data value.
    pub fn new(value: OpcUaValue) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// Creates a data value without a value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets the status code.
    pub fn with_status(mut self, status_code: u32) -> Self {
        self.status_code = status_code;
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    /// Sets the server timestamp.
    pub fn with_server_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.server_timestamp = Some(timestamp);
        self
    }

    /// Returns the scalar value, if one can be extracted.
    pub fn scalar(&self) -> Option<&OpcUaValue> {
        self.value.as_ref().filter(|v| v.is_scalar())
    }

    /// Returns `true` if the status code is Good.
    #[inline]
    pub fn is_good(&self) -> bool {
        status::is_good(self.status_code)
    }

    /// Returns `true` if the status code is Bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        status::is_bad(self.status_code)
    }
}

/// Status code helpers.
pub mod status {
    /// Good.
    pub const GOOD: u32 = 0;

    /// Returns `true` for Good status codes.
    #[inline]
    pub const fn is_good(code: u32) -> bool {
        code & 0xC000_0000 == 0
    }

    /// Returns `true` for Bad status codes.
    #[inline]
    pub const fn is_bad(code: u32) -> bool {
        code & 0x8000_0000 != 0
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Subscription request parameters.
///
/// Defaults are the parameters every telemetry subscription is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime count (publishing intervals before the subscription expires).
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Max keep-alive count.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Maximum notifications per publish.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Priority (higher is more important).
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Publishing enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    1000
}

fn default_keepalive_count() -> u32 {
    20
}

fn default_max_notifications() -> u32 {
    10
}

fn default_priority() -> u8 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: default_priority(),
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Validates the settings.
    pub fn validate(&self) -> Result<(), OpcUaError> {
        if self.publishing_interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "subscription.publishing_interval",
                "must be greater than zero",
            )
            .into());
        }
        // The server revises lifetimes below three keep-alive periods upwards;
        // reject them here so the configured values are the granted ones.
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(ConfigurationError::invalid_value(
                "subscription.lifetime_count",
                "must be at least three times keepalive_count",
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// MonitoredItemSettings
// =============================================================================

/// Monitored item request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Sampling interval.
    #[serde(default = "default_sampling_interval", with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue size; also the per-node event channel capacity.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Discard the oldest queued value when the queue is full.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_queue_size() -> u32 {
    10
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
        }
    }
}

impl MonitoredItemSettings {
    /// Validates the settings.
    pub fn validate(&self) -> Result<(), OpcUaError> {
        if self.queue_size == 0 {
            return Err(
                ConfigurationError::invalid_value("monitoring.queue_size", "must be at least 1")
                    .into(),
            );
        }
        Ok(())
    }

    /// Event channel capacity derived from the queue size.
    pub fn channel_capacity(&self) -> usize {
        self.queue_size.max(1) as usize
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parsing() {
        let node: NodeId = "ns=1;s=Var1".parse().unwrap();
        assert_eq!(node, NodeId::string(1, "Var1"));
        assert_eq!(node.to_string(), "ns=1;s=Var1");

        let node: NodeId = "i=84".parse().unwrap();
        assert_eq!(node, NodeId::root_folder());
        assert!(node.is_standard());

        let node: NodeId = "ns=2;g=550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert!(matches!(node.identifier, NodeIdentifier::Guid(_)));

        let node: NodeId = "ns=3;b=SGVsbG8=".parse().unwrap();
        assert_eq!(node.identifier, NodeIdentifier::Opaque(b"Hello".to_vec()));
        assert_eq!(node.to_string(), "ns=3;b=SGVsbG8=");
    }

    #[test]
    fn test_node_id_parsing_errors() {
        for input in ["", "ns=1", "ns=x;i=1", "ns=1;i=abc", "ns=1;x=1", "ns=1;s=", "g=nope"] {
            let err = input.parse::<NodeId>().unwrap_err();
            assert_eq!(err.category(), "configuration", "input: {input:?}");
        }
    }

    #[test]
    fn test_value_rendering_is_stable() {
        assert_eq!(OpcUaValue::Int32(42).to_string(), "42");
        assert_eq!(OpcUaValue::Double(42.0).to_string(), "42");
        assert_eq!(OpcUaValue::Double(21.5).to_string(), "21.5");
        assert_eq!(OpcUaValue::Boolean(true).to_string(), "true");
        assert_eq!(OpcUaValue::String("on".into()).to_string(), "on");
        assert_eq!(OpcUaValue::ByteString(b"Hello".to_vec()).to_string(), "SGVsbG8=");
        assert_eq!(
            OpcUaValue::Array(vec![OpcUaValue::Int16(1), OpcUaValue::Int16(2)]).to_string(),
            "[1,2]"
        );
    }

    #[test]
    fn test_data_value_scalar() {
        assert!(DataValue::new(OpcUaValue::UInt16(7)).scalar().is_some());
        assert!(DataValue::empty().scalar().is_none());
        assert!(DataValue::new(OpcUaValue::Null).scalar().is_none());
        assert!(DataValue::new(OpcUaValue::Array(vec![])).scalar().is_none());
    }

    #[test]
    fn test_status_codes() {
        assert!(DataValue::new(OpcUaValue::Null).is_good());
        let bad = DataValue::empty().with_status(0x8034_0000);
        assert!(bad.is_bad());
        assert!(!bad.is_good());

        let uncertain = DataValue::empty().with_status(0x4000_0000);
        assert!(!uncertain.is_good());
        assert!(!uncertain.is_bad());
    }

    #[test]
    fn test_subscription_defaults() {
        let settings = SubscriptionSettings::default();
        assert_eq!(settings.publishing_interval, Duration::from_millis(1000));
        assert_eq!(settings.lifetime_count, 1000);
        assert_eq!(settings.keepalive_count, 20);
        assert_eq!(settings.max_notifications_per_publish, 10);
        assert_eq!(settings.priority, 10);
        assert!(settings.publishing_enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_subscription_validation() {
        let settings = SubscriptionSettings {
            lifetime_count: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_monitored_item_defaults() {
        let settings = MonitoredItemSettings::default();
        assert_eq!(settings.sampling_interval, Duration::from_millis(100));
        assert_eq!(settings.queue_size, 10);
        assert!(settings.discard_oldest);
        assert_eq!(settings.channel_capacity(), 10);
    }

    #[test]
    fn test_settings_deserialize_with_humantime() {
        let json = r#"{"sampling_interval":"250ms","queue_size":5}"#;
        let settings: MonitoredItemSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.sampling_interval, Duration::from_millis(250));
        assert_eq!(settings.queue_size, 5);
        assert!(settings.discard_oldest);
    }

    #[test]
    fn test_attribute_ids() {
        assert_eq!(AttributeId::Value.id(), 13);
        assert_eq!(AttributeId::default(), AttributeId::Value);
    }
}
