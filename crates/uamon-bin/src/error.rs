// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the uamon binary.

use thiserror::Error;
use uamon_opcua::OpcUaError;

use crate::config::ConfigError;

/// Result type alias for uamon-bin operations.
pub type BinResult<T> = Result<T, BinError>;

/// Errors that can occur in the uamon binary.
#[derive(Debug, Error)]
pub enum BinError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Config loading error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// OPC UA client error.
    #[error(transparent)]
    OpcUa(#[from] OpcUaError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<BinError>,
    },
}

impl BinError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the OPC UA error at the root of this error, if any.
    pub fn opcua(&self) -> Option<&OpcUaError> {
        match self {
            Self::OpcUa(e) => Some(e),
            Self::WithContext { source, .. } => source.opcua(),
            _ => None,
        }
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::OpcUa(e) => match e {
                OpcUaError::Configuration(_) => 1,
                OpcUaError::Connection(_) | OpcUaError::Timeout(_) => 2,
                _ => 3,
            },
            Self::Runtime(_) => 3,
            Self::Io(_) => 4,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for BinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<anyhow::Error> for BinError {
    fn from(err: anyhow::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain and recovery hints.
pub fn report_error(error: &BinError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }

    if let Some(e) = error.opcua() {
        eprintln!("  Code: {}", e.error_code());
        for hint in e.recovery_hints() {
            eprintln!("  Hint: {}", hint);
        }
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: BinError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uamon_opcua::{ConfigurationError, ConnectionError, PreconditionError};

    #[test]
    fn test_error_creation() {
        let err = BinError::config("test error");
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_error_with_context() {
        let err = BinError::runtime("inner error").with_context("outer context");
        assert_eq!(err.to_string(), "outer context: Runtime error: inner error");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BinError::config("test").exit_code(), 1);
        assert_eq!(BinError::runtime("test").exit_code(), 3);
        assert_eq!(BinError::io("test").exit_code(), 4);

        let missing: BinError = OpcUaError::from(ConfigurationError::MissingEndpoint).into();
        assert_eq!(missing.exit_code(), 1);

        let refused: BinError =
            OpcUaError::from(ConnectionError::failed("opc.tcp://host:4840")).into();
        assert_eq!(refused.exit_code(), 2);
        assert_eq!(refused.with_context("startup").exit_code(), 2);

        let precondition: BinError = OpcUaError::from(PreconditionError::NoSession).into();
        assert_eq!(precondition.exit_code(), 3);
    }

    #[test]
    fn test_opcua_error_is_transparent() {
        let err: BinError = OpcUaError::from(ConfigurationError::MissingEndpoint).into();
        assert_eq!(
            err.to_string(),
            OpcUaError::from(ConfigurationError::MissingEndpoint).to_string()
        );
        assert!(err.with_context("connect").opcua().is_some());
    }
}
