// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client plumbing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SessionController                           │
//! │          (connect → create_session → create_subscription)       │
//! └─────────────────────────────────────────────────────────────────┘
//!                  │                              │
//!                  ▼                              ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────────┐
//! │        Arc<Session>           │ │      Arc<Subscription>        │
//! │     (read, browse)            │ │   (monitor, liveness)         │
//! └───────────────────────────────┘ └───────────────────────────────┘
//!                  │                              │
//!                  └──────────────┬───────────────┘
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Arc<dyn OpcUaTransport>                         │
//! │       (RealTransport over `opcua`, ScriptedTransport in tests)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{OpcUaResult, TimeoutError};

#[cfg(any(test, feature = "test-support"))]
pub mod mock;
#[cfg(feature = "real-transport")]
pub mod real_transport;
pub mod session;
pub mod subscription;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub use mock::ScriptedTransport;
#[cfg(feature = "real-transport")]
pub use real_transport::{RealTransport, RealTransportConfig};
pub use session::Session;
pub use subscription::{RevisedParameters, Subscription, SubscriptionState};
pub use transport::{
    MonitoredItemEvent, MonitoredItemGrant, MonitoredItemRequest, OpcUaTransport, SessionInfo,
    SubscriptionEvent, SubscriptionGrant, TransportState,
};

/// Runs a transport call, bounded by `timeout` when one is set.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    timeout: Option<Duration>,
    future: F,
) -> OpcUaResult<T>
where
    F: Future<Output = OpcUaResult<T>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeoutError::new(operation, duration))?,
        None => future.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpcUaError;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: OpcUaResult<()> = with_timeout(
            "connect",
            Some(Duration::from_millis(50)),
            std::future::pending(),
        )
        .await;

        match result {
            Err(OpcUaError::Timeout(e)) => {
                assert_eq!(e.operation, "connect");
                assert_eq!(e.duration, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_disabled() {
        let result = with_timeout("read", None, async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }
}
