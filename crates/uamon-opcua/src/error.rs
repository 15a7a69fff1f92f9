// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client error types.
//!
//! Every failure the lifecycle or the node pipeline can produce maps to one
//! variant of [`OpcUaError`]. Transport-reported causes are kept as
//! `#[source]` so the full chain is available to whoever reports the error.
//!
//! ```text
//! OpcUaError
//! ├── Configuration - Missing endpoint/transport, unparsable node ids
//! ├── Connection    - Transport could not reach the server
//! ├── Session       - Session creation/lifetime failures
//! ├── Subscription  - Subscription creation failures, termination
//! ├── Precondition  - A dependent step invoked before its prerequisite
//! ├── Read          - One-shot value read failures
//! ├── Browse        - Reference browsing failures
//! ├── Monitoring    - Monitored item registration failures
//! └── Timeout       - A transport call exceeded the request timeout
//! ```
//!
//! ```
//! use uamon_opcua::error::{ErrorSeverity, OpcUaError, PreconditionError};
//!
//! let error = OpcUaError::from(PreconditionError::NoSession);
//! assert_eq!(error.category(), "precondition");
//! assert_eq!(error.severity(), ErrorSeverity::Critical);
//! assert!(!error.is_retryable());
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed cause carried by errors that wrap a transport failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for OPC UA client operations.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Configuration errors (fatal at startup).
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Connection errors.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Session lifecycle errors.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Subscription errors.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// A step was invoked before its prerequisite completed.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// One-shot read errors.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Browse errors.
    #[error(transparent)]
    Browse(#[from] BrowseError),

    /// Monitored item registration errors.
    #[error(transparent)]
    Monitoring(#[from] MonitoringError),

    /// Timeout errors.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl OpcUaError {
    /// Shorthand for a call made while the transport is disconnected.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Returns `true` if retrying the same call may succeed.
    ///
    /// Nothing in this crate retries on its own; the flag is informational
    /// for operators and supervising processes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Session(_) | Self::Timeout(_) => true,
            Self::Read(_) => true,
            Self::Monitoring(_) => true,
            Self::Subscription(e) => e.is_retryable(),
            Self::Browse(_) => true,
            Self::Configuration(_) | Self::Precondition(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::Precondition(_) => ErrorSeverity::Critical,
            Self::Connection(_) | Self::Session(_) | Self::Subscription(_) => ErrorSeverity::Error,
            Self::Read(_) | Self::Browse(_) | Self::Monitoring(_) | Self::Timeout(_) => {
                ErrorSeverity::Warning
            }
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Precondition(_) => "precondition",
            Self::Read(_) => "read",
            Self::Browse(_) => "browse",
            Self::Monitoring(_) => "monitoring",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Configuration(e) => e.error_code(),
            Self::Connection(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Subscription(e) => e.error_code(),
            Self::Precondition(e) => e.error_code(),
            Self::Read(e) => e.error_code(),
            Self::Browse(_) => ErrorCode::new(7, 1),
            Self::Monitoring(e) => e.error_code(),
            Self::Timeout(_) => ErrorCode::new(9, 1),
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Configuration(e) => e.recovery_hints(),
            Self::Connection(e) => e.recovery_hints(),
            Self::Session(_) => vec![
                "Check the server's session limits",
                "Verify the user identity is accepted by the server",
            ],
            Self::Subscription(_) => vec![
                "Check the server's subscription limits",
                "Restart the client to create a fresh subscription",
            ],
            Self::Precondition(_) => vec![
                "Call connect, create_session and create_subscription in that order",
            ],
            Self::Read(_) | Self::Monitoring(_) => vec![
                "Verify the node identifier exists on the server",
                "Check the user has read access to the node",
            ],
            Self::Browse(_) => vec!["Verify the browsed node exists on the server"],
            Self::Timeout(_) => vec![
                "Check network latency to the server",
                "Increase request_timeout",
            ],
        }
    }

    /// Logs the error at the level matching its severity.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    error_code = %code,
                    category = self.category(),
                    context = context,
                    retryable = self.is_retryable(),
                    "{self}"
                )
            };
        }
        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::Error => emit!(error),
            ErrorSeverity::Warning => emit!(warn),
            ErrorSeverity::Info => emit!(debug),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No endpoint was configured.
    #[error("No endpoint configured")]
    MissingEndpoint,

    /// No transport client was supplied.
    #[error("No transport client configured")]
    MissingTransport,

    /// Invalid node identifier.
    #[error("Invalid node id '{node_id}': {reason}")]
    InvalidNodeId {
        /// The invalid node id.
        node_id: String,
        /// Reason.
        reason: String,
    },

    /// Invalid setting value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Setting name.
        field: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid node id error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::MissingEndpoint => 1,
            Self::MissingTransport => 2,
            Self::InvalidNodeId { .. } => 3,
            Self::InvalidValue { .. } => 4,
        };
        ErrorCode::new(1, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::MissingEndpoint => vec![
                "Set 'endpoint' in the configuration file or UAMON_ENDPOINT",
                "Endpoints use the form opc.tcp://host:port[/path]",
            ],
            Self::MissingTransport => vec!["Construct the controller with a transport"],
            Self::InvalidNodeId { .. } => vec![
                "Node ids use the form ns=<index>;<i|s|g|b>=<identifier>",
                "Example: ns=2;s=Temperature or ns=0;i=2258",
            ],
            Self::InvalidValue { .. } => vec!["Check the configuration file against the README"],
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport failed to connect.
    #[error("Cannot connect to endpoint '{endpoint}'")]
    Failed {
        /// Target endpoint.
        endpoint: String,
        /// Transport-reported cause.
        #[source]
        source: Option<BoxError>,
    },

    /// Endpoint discovery failed.
    #[error("Endpoint not found: '{endpoint}': {reason}")]
    EndpointNotFound {
        /// The endpoint URL.
        endpoint: String,
        /// Reason.
        reason: String,
    },

    /// No endpoint matches the requested security settings.
    #[error("No suitable endpoint found with security '{security}'")]
    NoSuitableEndpoint {
        /// Requested security policy/mode.
        security: String,
    },

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// Connection closed.
    #[error("Connection closed{}", .reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed {
        /// Close reason.
        reason: Option<String>,
    },
}

impl ConnectionError {
    /// Creates a connection failure without a cause.
    pub fn failed(endpoint: impl Into<String>) -> Self {
        Self::Failed {
            endpoint: endpoint.into(),
            source: None,
        }
    }

    /// Creates a connection failure carrying the transport cause.
    pub fn failed_with<E>(endpoint: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed {
            endpoint: endpoint.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an endpoint not found error.
    pub fn endpoint_not_found(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EndpointNotFound {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no suitable endpoint error.
    pub fn no_suitable_endpoint(security: impl Into<String>) -> Self {
        Self::NoSuitableEndpoint {
            security: security.into(),
        }
    }

    /// Creates a closed error.
    pub fn closed(reason: Option<String>) -> Self {
        Self::Closed { reason }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoSuitableEndpoint { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Failed { .. } => 1,
            Self::EndpointNotFound { .. } => 2,
            Self::NoSuitableEndpoint { .. } => 3,
            Self::NotConnected => 4,
            Self::Closed { .. } => 5,
        };
        ErrorCode::new(2, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Failed { .. } | Self::EndpointNotFound { .. } => vec![
                "Check if the OPC UA server is running",
                "Verify the endpoint host and port",
                "Check firewall rules for the OPC UA port (default 4840)",
            ],
            Self::NoSuitableEndpoint { .. } => vec![
                "Verify the server offers the configured security policy and mode",
            ],
            Self::NotConnected | Self::Closed { .. } => vec!["Restart the client to reconnect"],
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session creation failed.
    #[error("Could not create session: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
        /// Transport-reported cause.
        #[source]
        source: Option<BoxError>,
    },
}

impl SessionError {
    /// Creates a session creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a session creation failure carrying the transport cause.
    pub fn creation_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CreationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CreationFailed { .. } => ErrorCode::new(3, 1),
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription creation failed.
    #[error("Could not create subscription: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
        /// Transport-reported cause.
        #[source]
        source: Option<BoxError>,
    },

    /// The server terminated the subscription.
    #[error("Subscription {subscription_id} terminated")]
    Terminated {
        /// Subscription id.
        subscription_id: u32,
    },

    /// Unknown subscription id.
    #[error("Subscription {subscription_id} not found")]
    NotFound {
        /// Subscription id.
        subscription_id: u32,
    },
}

impl SubscriptionError {
    /// Creates a subscription creation failure.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a subscription creation failure carrying the transport cause.
    pub fn creation_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::CreationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a terminated error.
    pub fn terminated(subscription_id: u32) -> Self {
        Self::Terminated { subscription_id }
    }

    /// Creates a not found error.
    pub fn not_found(subscription_id: u32) -> Self {
        Self::NotFound { subscription_id }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreationFailed { .. })
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CreationFailed { .. } => 1,
            Self::Terminated { .. } => 2,
            Self::NotFound { .. } => 3,
        };
        ErrorCode::new(4, code)
    }
}

// =============================================================================
// PreconditionError
// =============================================================================

/// A lifecycle step was invoked out of order.
///
/// These indicate a sequencing bug in the caller, not a server problem.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// No connected client; `connect` has not succeeded.
    #[error("No client found: connect has not succeeded")]
    NoClient,

    /// No session; `create_session` has not succeeded.
    #[error("No active session found")]
    NoSession,

    /// No subscription; `create_subscription` has not succeeded.
    #[error("No active subscription found")]
    NoSubscription,

    /// Nothing has been browsed yet.
    #[error("No browse references available")]
    NotBrowsed,

    /// The resource already exists and is never re-created.
    #[error("{resource} already initialized")]
    AlreadyInitialized {
        /// Which resource.
        resource: &'static str,
    },
}

impl PreconditionError {
    /// Creates an already-initialized error.
    pub fn already_initialized(resource: &'static str) -> Self {
        Self::AlreadyInitialized { resource }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::NoClient => 1,
            Self::NoSession => 2,
            Self::NoSubscription => 3,
            Self::NotBrowsed => 4,
            Self::AlreadyInitialized { .. } => 5,
        };
        ErrorCode::new(5, code)
    }
}

// =============================================================================
// ReadError
// =============================================================================

/// One-shot read errors.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The transport failed the read.
    #[error("readVar for {node_id} encountered an error: {message}")]
    Failed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
        /// Transport-reported cause.
        #[source]
        source: Option<BoxError>,
    },
}

impl ReadError {
    /// Creates a read failure.
    pub fn failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            node_id: node_id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a read failure carrying the transport cause.
    pub fn failed_with<E>(node_id: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed {
            node_id: node_id.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Failed { .. } => ErrorCode::new(6, 1),
        }
    }
}

// =============================================================================
// BrowseError
// =============================================================================

/// Browse errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// Browse request failed.
    #[error("Could not browse {node_id}: {message}")]
    Failed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
    },
}

impl BrowseError {
    /// Creates a browse failure.
    pub fn failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// MonitoringError
// =============================================================================

/// Monitored item registration errors.
#[derive(Debug, Error)]
pub enum MonitoringError {
    /// Item creation failed.
    #[error("Could not monitor {node_id}: {message}")]
    ItemCreationFailed {
        /// Node id.
        node_id: String,
        /// Error message.
        message: String,
    },

    /// The server rejected the item with a bad status code.
    #[error("Could not monitor {node_id}: bad status 0x{status_code:08X}")]
    BadStatus {
        /// Node id.
        node_id: String,
        /// Status code.
        status_code: u32,
    },
}

impl MonitoringError {
    /// Creates an item creation failure.
    pub fn item_creation_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ItemCreationFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a bad status error.
    pub fn bad_status(node_id: impl Into<String>, status_code: u32) -> Self {
        Self::BadStatus {
            node_id: node_id.into(),
            status_code,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::ItemCreationFailed { .. } => 1,
            Self::BadStatus { .. } => 2,
        };
        ErrorCode::new(8, code)
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// A transport call did not complete within the request timeout.
#[derive(Debug, Error)]
#[error("{operation} timed out after {duration:?}")]
pub struct TimeoutError {
    /// Operation name.
    pub operation: &'static str,
    /// Elapsed timeout.
    pub duration: Duration,
}

impl TimeoutError {
    /// Creates a timeout error.
    pub fn new(operation: &'static str, duration: Duration) -> Self {
        Self {
            operation,
            duration,
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - degraded but operating.
    Warning,
    /// Error - action required.
    Error,
    /// Critical - startup cannot proceed.
    Critical,
}

impl ErrorSeverity {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `UA-XXYY` where XX is the category and YY the specific error.
///
/// Categories: 1 configuration, 2 connection, 3 session, 4 subscription,
/// 5 precondition, 6 read, 7 browse, 8 monitoring, 9 timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

/// Result alias used throughout the crate.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_connection_error_keeps_cause() {
        let cause = OpcUaError::from(ConnectionError::closed(Some("reset".into())));
        let error: OpcUaError = ConnectionError::failed_with("opc.tcp://host:4840", cause).into();

        assert!(error.to_string().contains("opc.tcp://host:4840"));
        let source = error.source().expect("cause chain");
        assert!(source.to_string().contains("reset"));
    }

    #[test]
    fn test_precondition_errors_are_not_retryable() {
        let error = OpcUaError::from(PreconditionError::NoClient);
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(error.error_code().to_string(), "UA-0501");
    }

    #[test]
    fn test_already_initialized_message() {
        let error = PreconditionError::already_initialized("session");
        assert_eq!(error.to_string(), "session already initialized");
    }

    #[test]
    fn test_monitoring_bad_status() {
        let error = MonitoringError::bad_status("ns=2;s=Temp", 0x8034_0000);
        assert!(error.to_string().contains("0x80340000"));
        assert_eq!(error.error_code().to_string(), "UA-0802");
    }

    #[test]
    fn test_read_failure_keeps_cause() {
        let error: OpcUaError =
            ReadError::failed_with("ns=2;s=Temp", OpcUaError::not_connected()).into();
        assert!(error.is_retryable());
        assert_eq!(error.error_code().to_string(), "UA-0601");
        assert!(error.source().is_some());
    }

    #[test]
    fn test_category_and_code() {
        assert_eq!(OpcUaError::not_connected().category(), "connection");

        let timeout = OpcUaError::from(TimeoutError::new("connect", Duration::from_secs(1)));
        assert_eq!(timeout.category(), "timeout");
        assert_eq!(timeout.error_code().to_string(), "UA-0901");
        assert!(timeout.is_retryable());

        let invalid = OpcUaError::from(ConfigurationError::invalid_node_id("bad", "reason"));
        assert_eq!(invalid.category(), "configuration");
        assert_eq!(invalid.error_code().to_string(), "UA-0103");
    }

    #[test]
    fn test_monitoring_failure_is_a_warning() {
        let error = OpcUaError::from(MonitoringError::item_creation_failed(
            "ns=1;s=Var1",
            "BadNodeIdUnknown",
        ));
        assert_eq!(error.severity(), ErrorSeverity::Warning);
        assert!(error.to_string().contains("BadNodeIdUnknown"));
    }

    #[test]
    fn test_recovery_hints() {
        let error = OpcUaError::from(ConfigurationError::invalid_node_id(
            "bad;format",
            "missing identifier",
        ));
        assert!(error.recovery_hints().iter().any(|h| h.contains("ns=")));
    }
}
