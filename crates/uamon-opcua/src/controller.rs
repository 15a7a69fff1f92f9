// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection, session and subscription lifecycle.
//!
//! [`SessionController`] owns one connection, at most one session and at
//! most one subscription, created strictly in that order:
//!
//! ```text
//! Created ──connect──▶ Connected ──create_session──▶ SessionActive
//!                                                        │
//!                                          create_subscription
//!                                                        ▼
//!                                                   Subscribed
//! ```
//!
//! Setup calls take `&mut self`, so two of them can never overlap. A failed
//! step leaves the controller in the state it had before the call. Repeating
//! a completed step fails with [`PreconditionError::AlreadyInitialized`].
//!
//! Once the subscription exists, a relay task forwards its keep-alive and
//! termination notifications to [`SessionController::lifecycle_events`].
//! Termination is logged at error level and is not followed by an automatic
//! re-subscription.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::browse::BrowseReference;
use crate::client::subscription::RevisedParameters;
use crate::client::transport::{OpcUaTransport, SubscriptionEvent};
use crate::client::{with_timeout, Session, Subscription};
use crate::error::{
    BrowseError, ConfigurationError, ConnectionError, ErrorSeverity, OpcUaError, OpcUaResult,
    PreconditionError, SessionError, SubscriptionError,
};
use crate::types::{MonitoredItemSettings, NodeId, SubscriptionSettings};

const LIFECYCLE_CAPACITY: usize = 64;

// =============================================================================
// ControllerState
// =============================================================================

/// Lifecycle stage of a [`SessionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Nothing established yet.
    #[default]
    Created,
    /// Transport connected.
    Connected,
    /// Session established.
    SessionActive,
    /// Subscription established.
    Subscribed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Connected => "connected",
            Self::SessionActive => "session_active",
            Self::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// ControllerSettings
// =============================================================================

/// Request parameters used by the controller and the nodes bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Subscription request parameters.
    pub subscription: SubscriptionSettings,

    /// Monitored item parameters for every node.
    pub monitoring: MonitoredItemSettings,

    /// Upper bound for each transport call; `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            subscription: SubscriptionSettings::default(),
            monitoring: MonitoredItemSettings::default(),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

// =============================================================================
// LifecycleSignal
// =============================================================================

/// Subscription liveness signal relayed by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// The subscription is alive.
    KeepAlive {
        /// Subscription id.
        subscription_id: u32,
        /// Local receive time.
        at: DateTime<Utc>,
    },

    /// The server terminated the subscription.
    Terminated {
        /// Subscription id.
        subscription_id: u32,
        /// Reported reason.
        reason: String,
    },
}

impl LifecycleSignal {
    /// Returns the severity of the signal.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::KeepAlive { .. } => ErrorSeverity::Info,
            Self::Terminated { .. } => ErrorSeverity::Error,
        }
    }

    /// Returns the subscription the signal belongs to.
    pub fn subscription_id(&self) -> u32 {
        match self {
            Self::KeepAlive {
                subscription_id, ..
            }
            | Self::Terminated {
                subscription_id, ..
            } => *subscription_id,
        }
    }
}

// =============================================================================
// SessionController
// =============================================================================

/// Owns and sequences the connection, session and subscription.
pub struct SessionController {
    endpoint: Option<String>,
    transport: Option<Arc<dyn OpcUaTransport>>,
    settings: ControllerSettings,
    state: ControllerState,
    session: Option<Arc<Session>>,
    subscription: Option<Arc<Subscription>>,
    references: Option<Vec<BrowseReference>>,
    lifecycle: broadcast::Sender<LifecycleSignal>,
    relay: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Creates a controller with default settings.
    ///
    /// A missing endpoint or transport is reported by [`connect`](Self::connect).
    pub fn new(endpoint: Option<String>, transport: Option<Arc<dyn OpcUaTransport>>) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            endpoint,
            transport,
            settings: ControllerSettings::default(),
            state: ControllerState::Created,
            session: None,
            subscription: None,
            references: None,
            lifecycle,
            relay: None,
        }
    }

    /// Replaces the settings. Takes effect for steps not yet performed.
    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the configured endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns the settings.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Returns the lifecycle stage.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Returns the session.
    pub fn session(&self) -> OpcUaResult<Arc<Session>> {
        self.session
            .clone()
            .ok_or_else(|| PreconditionError::NoSession.into())
    }

    /// Returns the subscription.
    pub fn subscription(&self) -> OpcUaResult<Arc<Subscription>> {
        self.subscription
            .clone()
            .ok_or_else(|| PreconditionError::NoSubscription.into())
    }

    pub(crate) fn session_snapshot(&self) -> Option<Arc<Session>> {
        self.session.clone()
    }

    pub(crate) fn subscription_snapshot(&self) -> Option<Arc<Subscription>> {
        self.subscription.clone()
    }

    /// Subscribes to relayed subscription lifecycle signals.
    pub fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.lifecycle.subscribe()
    }

    /// Returns the references stored by the last browse.
    pub fn browse_references(&self) -> OpcUaResult<&[BrowseReference]> {
        self.references
            .as_deref()
            .ok_or_else(|| PreconditionError::NotBrowsed.into())
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Opens the transport connection to the configured endpoint.
    pub async fn connect(&mut self) -> OpcUaResult<()> {
        if self.state != ControllerState::Created {
            return Err(PreconditionError::already_initialized("client").into());
        }
        let endpoint = match self.endpoint.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e.to_string(),
            _ => return Err(ConfigurationError::MissingEndpoint.into()),
        };
        let transport = self
            .transport
            .clone()
            .ok_or(ConfigurationError::MissingTransport)?;

        info!(endpoint = %endpoint, transport = %transport.display_name(), "Connecting");

        with_timeout(
            "connect",
            self.settings.request_timeout,
            transport.connect(&endpoint),
        )
        .await
        .map_err(|e| match e {
            OpcUaError::Timeout(_) => e,
            cause => ConnectionError::failed_with(&endpoint, cause).into(),
        })?;

        self.state = ControllerState::Connected;
        info!(endpoint = %endpoint, "Connected");
        Ok(())
    }

    /// Creates the session on the open connection.
    pub async fn create_session(&mut self) -> OpcUaResult<()> {
        if self.session.is_some() {
            return Err(PreconditionError::already_initialized("session").into());
        }
        let transport = self.connected_transport()?;

        let info = with_timeout(
            "create_session",
            self.settings.request_timeout,
            transport.create_session(),
        )
        .await
        .map_err(|e| match e {
            OpcUaError::Timeout(_) => e,
            cause => SessionError::creation_failed_with("transport rejected session", cause).into(),
        })?;

        info!(session_id = %info.session_id, "Session created");
        self.session = Some(Arc::new(Session::new(
            transport,
            info,
            self.settings.request_timeout,
        )));
        self.state = ControllerState::SessionActive;
        Ok(())
    }

    /// Creates the subscription and attaches the lifecycle relay.
    pub async fn create_subscription(&mut self) -> OpcUaResult<()> {
        if self.subscription.is_some() {
            return Err(PreconditionError::already_initialized("subscription").into());
        }
        let session = self.session()?;
        let transport = self.connected_transport()?;
        self.settings.subscription.validate()?;

        let requested = self.settings.subscription.clone();
        let grant = with_timeout(
            "create_subscription",
            self.settings.request_timeout,
            transport.create_subscription(session.info(), &requested),
        )
        .await
        .map_err(|e| match e {
            OpcUaError::Timeout(_) => e,
            cause => {
                SubscriptionError::creation_failed_with("transport rejected subscription", cause)
                    .into()
            }
        })?;

        let revised = RevisedParameters {
            publishing_interval: grant.revised_publishing_interval,
            lifetime_count: grant.revised_lifetime_count,
            keepalive_count: grant.revised_keepalive_count,
        };
        let subscription = Arc::new(Subscription::new(
            transport,
            grant.subscription_id,
            requested,
            revised,
            self.settings.request_timeout,
        ));

        info!(
            subscription_id = grant.subscription_id,
            publishing_interval = ?revised.publishing_interval,
            lifetime_count = revised.lifetime_count,
            keepalive_count = revised.keepalive_count,
            "Subscription created"
        );

        self.relay = Some(spawn_lifecycle_relay(
            subscription.clone(),
            grant.events,
            self.lifecycle.clone(),
        ));
        self.subscription = Some(subscription);
        self.state = ControllerState::Subscribed;
        Ok(())
    }

    /// Runs `connect`, `create_session` and `create_subscription` in order.
    pub async fn start(&mut self) -> OpcUaResult<()> {
        self.connect().await?;
        self.create_session().await?;
        self.create_subscription().await
    }

    // =========================================================================
    // Browse
    // =========================================================================

    /// Browses the forward hierarchical references of `node_id` and stores them.
    pub async fn browse(&mut self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        let session = self.session()?;
        let references = session.browse(node_id).await.map_err(|e| match e {
            OpcUaError::Timeout(_) | OpcUaError::Browse(_) => e,
            cause => BrowseError::failed(node_id.to_string(), cause.to_string()).into(),
        })?;

        info!(node_id = %node_id, count = references.len(), "Browsed references");
        for reference in &references {
            debug!(node_id = %node_id, reference = %reference, "Reference");
        }

        self.references = Some(references.clone());
        Ok(references)
    }

    /// Browses the `RootFolder`.
    pub async fn browse_root(&mut self) -> OpcUaResult<Vec<BrowseReference>> {
        self.browse(&NodeId::root_folder()).await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stops the relay and closes the connection.
    ///
    /// The controller returns to [`ControllerState::Created`]; nodes keep the
    /// handles they snapshotted but their transport calls fail from now on.
    pub async fn disconnect(&mut self) -> OpcUaResult<()> {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
        self.subscription = None;
        self.session = None;
        self.references = None;

        if self.state == ControllerState::Created {
            return Ok(());
        }
        self.state = ControllerState::Created;

        if let Some(transport) = self.transport.clone() {
            with_timeout(
                "disconnect",
                self.settings.request_timeout,
                transport.disconnect(),
            )
            .await?;
        }
        info!(endpoint = ?self.endpoint, "Disconnected");
        Ok(())
    }

    fn connected_transport(&self) -> OpcUaResult<Arc<dyn OpcUaTransport>> {
        if self.state < ControllerState::Connected {
            return Err(PreconditionError::NoClient.into());
        }
        self.transport
            .clone()
            .ok_or_else(|| PreconditionError::NoClient.into())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.abort();
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// Forwards subscription notifications until termination or channel close.
fn spawn_lifecycle_relay(
    subscription: Arc<Subscription>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<SubscriptionEvent>,
    signals: broadcast::Sender<LifecycleSignal>,
) -> JoinHandle<()> {
    let subscription_id = subscription.id();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SubscriptionEvent::KeepAlive => {
                    subscription.record_keepalive();
                    debug!(subscription_id, "Subscription Alive");
                    let _ = signals.send(LifecycleSignal::KeepAlive {
                        subscription_id,
                        at: Utc::now(),
                    });
                }
                SubscriptionEvent::Terminated { reason } => {
                    subscription.mark_terminated(reason.clone());
                    error!(
                        subscription_id,
                        reason = %reason,
                        "*** ACTIVE SUBSCRIPTION TERMINATED ***"
                    );
                    let _ = signals.send(LifecycleSignal::Terminated {
                        subscription_id,
                        reason,
                    });
                    break;
                }
            }
        }
        debug!(subscription_id, "Lifecycle relay stopped");
    })
}

// =============================================================================
// Tests
// =============================================================================
