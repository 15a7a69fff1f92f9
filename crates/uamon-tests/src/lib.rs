// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uamon Integration Tests
//!
//! Shared fixtures and a harness around the scripted transport, plus the
//! cross-module integration suites under `tests/`.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Endpoints, node identifiers, values and settings
//!   - `harness`: Scripted transport + controller + registry in one place
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p uamon-tests
//! cargo test -p uamon-tests --test integration_lifecycle
//! cargo test -p uamon-tests --test integration_monitoring
//! ```
//!
//! ## Using the Harness
//!
//! ```rust,ignore
//! use uamon_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let mut harness = TestHarness::started().await;
//!     let node = harness.monitored_node(NodeFixtures::VAR1).await;
//!     let mut listener = node.listener().subscribe();
//!     harness.emit_change(NodeFixtures::VAR1, ValueFixtures::int(42));
//!     let event = recv_within(&mut listener, DEFAULT_WAIT).await;
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::init_test_logging;
}
