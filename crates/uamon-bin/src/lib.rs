// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamon-bin
//!
//! CLI binary for the uamon OPC UA telemetry client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                             │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │   cli.rs    │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                          │
//!               ┌──────────┼──────────┐
//!               ▼          ▼          ▼
//!          ┌────────┐ ┌──────────┐ ┌─────────────┐
//!          │ config │ │ shutdown │ │ uamon-opcua │
//!          └────────┘ └──────────┘ └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Monitor the configured nodes (default command)
//! uamon -c plant.yaml
//!
//! # Read every configured node once
//! uamon read -f json
//!
//! # List the RootFolder references
//! uamon browse
//!
//! # Validate configuration
//! uamon validate --strict
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use config::{load_config, ConfigError, ConfigLoader, UamonConfig};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{ClientRuntime, RunSummary, RuntimeBuilder};
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
