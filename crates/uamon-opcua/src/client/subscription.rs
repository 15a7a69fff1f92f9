// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared subscription handle.
//!
//! The controller creates exactly one [`Subscription`]; every monitored node
//! attaches its item to it. The handle tracks liveness as reported by the
//! lifecycle relay: keep-alives are counted, termination is sticky and
//! refuses further monitored items.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::client::transport::{MonitoredItemGrant, MonitoredItemRequest, OpcUaTransport};
use crate::client::with_timeout;
use crate::error::{OpcUaResult, SubscriptionError};
use crate::types::SubscriptionSettings;

// =============================================================================
// SubscriptionState
// =============================================================================

/// Liveness of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// The server is publishing.
    #[default]
    Active,

    /// The server terminated the subscription.
    Terminated {
        /// Reason reported with the termination.
        reason: String,
    },
}

impl SubscriptionState {
    /// Returns `true` if the subscription is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Terminated { reason } => write!(f, "Terminated ({})", reason),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Server-granted subscription parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisedParameters {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub keepalive_count: u32,
}

/// An active OPC UA subscription.
pub struct Subscription {
    transport: Arc<dyn OpcUaTransport>,
    subscription_id: u32,
    requested: SubscriptionSettings,
    revised: RevisedParameters,
    request_timeout: Option<Duration>,
    state: RwLock<SubscriptionState>,
    keepalives: AtomicU64,
    last_keepalive: RwLock<Option<DateTime<Utc>>>,
}

impl Subscription {
    pub(crate) fn new(
        transport: Arc<dyn OpcUaTransport>,
        subscription_id: u32,
        requested: SubscriptionSettings,
        revised: RevisedParameters,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            subscription_id,
            requested,
            revised,
            request_timeout,
            state: RwLock::new(SubscriptionState::Active),
            keepalives: AtomicU64::new(0),
            last_keepalive: RwLock::new(None),
        }
    }

    /// Returns the server-assigned subscription id.
    pub fn id(&self) -> u32 {
        self.subscription_id
    }

    /// Returns the requested settings.
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.requested
    }

    /// Returns the parameters the server granted.
    pub fn revised(&self) -> RevisedParameters {
        self.revised
    }

    /// Returns the current state.
    pub fn state(&self) -> SubscriptionState {
        self.state.read().clone()
    }

    /// Returns `true` once the server has terminated the subscription.
    pub fn is_terminated(&self) -> bool {
        !self.state.read().is_active()
    }

    /// Returns the number of keep-alives received.
    pub fn keepalive_count(&self) -> u64 {
        self.keepalives.load(Ordering::Relaxed)
    }

    /// Returns when the last keep-alive arrived.
    pub fn last_keepalive(&self) -> Option<DateTime<Utc>> {
        *self.last_keepalive.read()
    }

    pub(crate) fn record_keepalive(&self) {
        self.keepalives.fetch_add(1, Ordering::Relaxed);
        *self.last_keepalive.write() = Some(Utc::now());
    }

    pub(crate) fn mark_terminated(&self, reason: impl Into<String>) {
        *self.state.write() = SubscriptionState::Terminated {
            reason: reason.into(),
        };
    }

    /// Registers a monitored item in this subscription.
    pub async fn monitor(&self, request: &MonitoredItemRequest) -> OpcUaResult<MonitoredItemGrant> {
        if self.is_terminated() {
            return Err(SubscriptionError::terminated(self.subscription_id).into());
        }
        with_timeout(
            "create_monitored_item",
            self.request_timeout,
            self.transport
                .create_monitored_item(self.subscription_id, request),
        )
        .await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.subscription_id)
            .field("revised", &self.revised)
            .field("state", &*self.state.read())
            .field("keepalives", &self.keepalive_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::ScriptedTransport;
    use crate::types::{MonitoredItemSettings, NodeId};

    fn subscription(transport: Arc<ScriptedTransport>) -> Subscription {
        let settings = SubscriptionSettings::default();
        Subscription::new(
            transport,
            7,
            settings.clone(),
            RevisedParameters {
                publishing_interval: settings.publishing_interval,
                lifetime_count: settings.lifetime_count,
                keepalive_count: settings.keepalive_count,
            },
            None,
        )
    }

    #[test]
    fn test_keepalive_tracking() {
        let sub = subscription(Arc::new(ScriptedTransport::new()));
        assert_eq!(sub.keepalive_count(), 0);
        assert!(sub.last_keepalive().is_none());

        sub.record_keepalive();
        sub.record_keepalive();

        assert_eq!(sub.keepalive_count(), 2);
        assert!(sub.last_keepalive().is_some());
        assert!(sub.state().is_active());
    }

    #[tokio::test]
    async fn test_terminated_subscription_refuses_items() {
        let transport = Arc::new(ScriptedTransport::new());
        let sub = subscription(transport.clone());
        sub.mark_terminated("BadTimeout");

        assert!(sub.is_terminated());
        assert_eq!(sub.state().to_string(), "Terminated (BadTimeout)");

        let request =
            MonitoredItemRequest::value(NodeId::string(1, "Var1"), MonitoredItemSettings::default());
        let err = sub.monitor(&request).await.unwrap_err();
        assert_eq!(err.category(), "subscription");
        assert_eq!(transport.call_count("create_monitored_item"), 0);
    }
}
