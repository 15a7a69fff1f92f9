// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport backed by the `opcua` crate.
//!
//! The `opcua` client API is synchronous, so every service call runs on the
//! blocking pool. `connect` discovers the server endpoints and picks the
//! unsecured one; `create_session` opens and activates the session and starts
//! its publish loop. Data change callbacks are routed to per-item channels by
//! client handle, and every value the server queued for an item in one
//! publish response is forwarded, oldest first.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uamon_opcua::client::{RealTransport, RealTransportConfig};
//!
//! let transport = Arc::new(RealTransport::new(RealTransportConfig::default()));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use opcua::client::prelude::{
    BrowseDescription, BrowseDescriptionResultMask, BrowseDirection, Client, ClientBuilder,
    ConnectionStatusCallback, DataChangeCallback, EndpointDescription, ExtensionObject,
    IdentityToken, MessageSecurityMode, MonitoredItemCreateRequest, MonitoringMode,
    MonitoringParameters, QualifiedName, ReadValueId, ReferenceTypeId, SecurityPolicy, Session,
    SessionClosedCallback, SessionCommand, UAString,
};
use opcua::client::prelude::{
    AttributeService, MonitoredItemService, SubscriptionService, ViewService,
};
use opcua::sync::RwLock as OpcUaRwLock;

use crate::browse::{BrowseReference, NodeClass};
use crate::client::transport::{
    MonitoredItemEvent, MonitoredItemGrant, MonitoredItemRequest, OpcUaTransport, SessionInfo,
    SubscriptionEvent, SubscriptionGrant, TransportState,
};
use crate::error::{
    BrowseError, ConnectionError, MonitoringError, OpcUaError, OpcUaResult, ReadError,
    SessionError, SubscriptionError,
};
use crate::types::{
    status, AttributeId, DataValue, NodeId, NodeIdentifier, OpcUaValue, SubscriptionSettings,
    TimestampsToReturn,
};

type ItemRoutes = Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<MonitoredItemEvent>>>>;
type LifecycleSenders = Arc<Mutex<Vec<mpsc::UnboundedSender<SubscriptionEvent>>>>;

// =============================================================================
// RealTransportConfig
// =============================================================================

/// Client-side settings for [`RealTransport`].
#[derive(Debug, Clone)]
pub struct RealTransportConfig {
    /// Application name announced to the server.
    pub application_name: String,

    /// Application URI announced to the server.
    pub application_uri: String,

    /// Session name.
    pub session_name: String,

    /// Directory holding the client PKI.
    pub pki_dir: PathBuf,

    /// Trust server certificates without validation.
    pub trust_server_certs: bool,

    /// Requested session timeout.
    pub session_timeout: Duration,

    /// Reconnect attempts the `opcua` session performs on its own.
    pub session_retry_limit: i32,
}

impl Default for RealTransportConfig {
    fn default() -> Self {
        Self {
            application_name: "uamon".to_string(),
            application_uri: "urn:uamon:client".to_string(),
            session_name: "uamon".to_string(),
            pki_dir: PathBuf::from("pki"),
            trust_server_certs: true,
            session_timeout: Duration::from_secs(60),
            session_retry_limit: 0,
        }
    }
}

// =============================================================================
// RealTransport
// =============================================================================

/// OPC UA transport over a real network connection.
pub struct RealTransport {
    config: RealTransportConfig,
    state: Mutex<TransportState>,
    client: Mutex<Option<Arc<Mutex<Client>>>>,
    endpoint: Mutex<Option<(String, EndpointDescription)>>,
    session: Mutex<Option<Arc<OpcUaRwLock<Session>>>>,
    session_loop: Mutex<Option<oneshot::Sender<SessionCommand>>>,
    item_routes: ItemRoutes,
    lifecycle: LifecycleSenders,
    next_client_handle: AtomicU32,
}

impl RealTransport {
    /// Creates a disconnected transport.
    pub fn new(config: RealTransportConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TransportState::Disconnected),
            client: Mutex::new(None),
            endpoint: Mutex::new(None),
            session: Mutex::new(None),
            session_loop: Mutex::new(None),
            item_routes: Arc::new(Mutex::new(HashMap::new())),
            lifecycle: Arc::new(Mutex::new(Vec::new())),
            next_client_handle: AtomicU32::new(1),
        }
    }

    fn build_client(&self) -> OpcUaResult<Client> {
        ClientBuilder::new()
            .application_name(self.config.application_name.as_str())
            .application_uri(self.config.application_uri.as_str())
            .create_sample_keypair(true)
            .pki_dir(self.config.pki_dir.clone())
            .trust_server_certs(self.config.trust_server_certs)
            .session_retry_limit(self.config.session_retry_limit)
            .session_timeout(self.config.session_timeout.as_millis() as u32)
            .client()
            .ok_or_else(|| {
                OpcUaError::from(crate::error::ConfigurationError::invalid_value(
                    "client",
                    "opcua client configuration rejected",
                ))
            })
    }

    fn session_handle(&self) -> OpcUaResult<Arc<OpcUaRwLock<Session>>> {
        self.session
            .lock()
            .clone()
            .ok_or_else(OpcUaError::not_connected)
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    /// Fans a lifecycle event out to every open subscription.
    fn broadcast_lifecycle(senders: &LifecycleSenders, event: SubscriptionEvent) {
        senders.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn spawn_liveness_watch(
        &self,
        session: Arc<OpcUaRwLock<Session>>,
        period: Duration,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    ) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if events.is_closed() {
                    break;
                }
                let connected = {
                    let session = session.clone();
                    tokio::task::spawn_blocking(move || session.read().is_connected())
                        .await
                        .unwrap_or(false)
                };
                if !connected {
                    break;
                }
                if events.send(SubscriptionEvent::KeepAlive).is_err() {
                    break;
                }
            }
        });
    }
}

/// Runs a synchronous `opcua` call on the blocking pool.
async fn blocking<T, F>(operation: &'static str, f: F) -> OpcUaResult<T>
where
    F: FnOnce() -> OpcUaResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        OpcUaError::from(ConnectionError::closed(Some(format!(
            "{} task failed: {}",
            operation, e
        ))))
    })?
}

// =============================================================================
// Conversions
// =============================================================================

fn to_opcua_node_id(node_id: &NodeId) -> opcua::types::NodeId {
    let ns = node_id.namespace_index;
    match &node_id.identifier {
        NodeIdentifier::Numeric(v) => opcua::types::NodeId::new(ns, *v),
        NodeIdentifier::String(v) => opcua::types::NodeId::new(ns, UAString::from(v.as_str())),
        NodeIdentifier::Guid(v) => {
            opcua::types::NodeId::new(ns, opcua::types::Guid::from_bytes(*v.as_bytes()))
        }
        NodeIdentifier::Opaque(v) => {
            opcua::types::NodeId::new(ns, opcua::types::ByteString::from(v.clone()))
        }
    }
}

fn from_opcua_node_id(node_id: &opcua::types::NodeId) -> NodeId {
    let ns = node_id.namespace;
    match &node_id.identifier {
        opcua::types::Identifier::Numeric(v) => NodeId::numeric(ns, *v),
        opcua::types::Identifier::String(v) => NodeId::string(ns, v.as_ref()),
        opcua::types::Identifier::Guid(v) => {
            NodeId::guid(ns, uuid::Uuid::from_bytes(*v.as_bytes()))
        }
        opcua::types::Identifier::ByteString(v) => {
            NodeId::opaque(ns, v.value.clone().unwrap_or_default())
        }
    }
}

fn from_opcua_variant(variant: &opcua::types::Variant) -> OpcUaValue {
    use opcua::types::Variant;

    match variant {
        Variant::Empty => OpcUaValue::Null,
        Variant::Boolean(v) => OpcUaValue::Boolean(*v),
        Variant::SByte(v) => OpcUaValue::SByte(*v),
        Variant::Byte(v) => OpcUaValue::Byte(*v),
        Variant::Int16(v) => OpcUaValue::Int16(*v),
        Variant::UInt16(v) => OpcUaValue::UInt16(*v),
        Variant::Int32(v) => OpcUaValue::Int32(*v),
        Variant::UInt32(v) => OpcUaValue::UInt32(*v),
        Variant::Int64(v) => OpcUaValue::Int64(*v),
        Variant::UInt64(v) => OpcUaValue::UInt64(*v),
        Variant::Float(v) => OpcUaValue::Float(*v),
        Variant::Double(v) => OpcUaValue::Double(*v),
        Variant::String(v) => OpcUaValue::String(v.as_ref().to_string()),
        Variant::DateTime(v) => OpcUaValue::DateTime(v.as_chrono()),
        Variant::Guid(v) => OpcUaValue::Guid(uuid::Uuid::from_bytes(*v.as_bytes())),
        Variant::ByteString(v) => OpcUaValue::ByteString(v.value.clone().unwrap_or_default()),
        Variant::Array(arr) => {
            OpcUaValue::Array(arr.values.iter().map(from_opcua_variant).collect())
        }
        other => OpcUaValue::String(format!("{:?}", other)),
    }
}

fn from_opcua_data_value(value: &opcua::types::DataValue) -> DataValue {
    DataValue {
        value: value.value.as_ref().map(from_opcua_variant),
        status_code: value.status.map(|s| s.bits()).unwrap_or(status::GOOD),
        source_timestamp: value.source_timestamp.map(|t| t.as_chrono()),
        server_timestamp: value.server_timestamp.map(|t| t.as_chrono()),
    }
}

/// Maps every value queued for one item in a publish response, oldest first.
fn item_events(values: &[opcua::types::DataValue]) -> Vec<MonitoredItemEvent> {
    values
        .iter()
        .map(|raw| {
            let value = from_opcua_data_value(raw);
            if value.is_bad() {
                MonitoredItemEvent::Error(format!("bad status 0x{:08X}", value.status_code))
            } else {
                MonitoredItemEvent::Changed(value)
            }
        })
        .collect()
}

/// Removes an item route on drop unless the grant was handed out.
struct RouteGuard {
    routes: ItemRoutes,
    client_handle: u32,
    armed: bool,
}

impl RouteGuard {
    fn insert(
        routes: &ItemRoutes,
        client_handle: u32,
        tx: mpsc::UnboundedSender<MonitoredItemEvent>,
    ) -> Self {
        routes.lock().insert(client_handle, tx);
        Self {
            routes: routes.clone(),
            client_handle,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        if self.armed {
            self.routes.lock().remove(&self.client_handle);
        }
    }
}

fn to_opcua_timestamps(timestamps: TimestampsToReturn) -> opcua::types::TimestampsToReturn {
    match timestamps {
        TimestampsToReturn::Source => opcua::types::TimestampsToReturn::Source,
        TimestampsToReturn::Server => opcua::types::TimestampsToReturn::Server,
        TimestampsToReturn::Both => opcua::types::TimestampsToReturn::Both,
        TimestampsToReturn::Neither => opcua::types::TimestampsToReturn::Neither,
    }
}

fn read_value_id(node_id: &NodeId, attribute: AttributeId) -> ReadValueId {
    ReadValueId {
        node_id: to_opcua_node_id(node_id),
        attribute_id: attribute.id(),
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    }
}

// =============================================================================
// OpcUaTransport impl
// =============================================================================

#[async_trait]
impl OpcUaTransport for RealTransport {
    async fn connect(&self, endpoint: &str) -> OpcUaResult<()> {
        self.set_state(TransportState::Connecting);
        info!(endpoint = %endpoint, "Connecting to OPC UA server");

        let client = match self.build_client() {
            Ok(client) => client,
            Err(e) => {
                self.set_state(TransportState::Failed);
                return Err(e);
            }
        };
        let client = Arc::new(Mutex::new(client));

        let url = endpoint.to_string();
        let discovered = {
            let client = client.clone();
            let url = url.clone();
            blocking("connect", move || {
                client
                    .lock()
                    .get_server_endpoints_from_url(url.as_str())
                    .map_err(|e| ConnectionError::endpoint_not_found(&url, e.to_string()).into())
            })
            .await
        };
        let endpoints = match discovered {
            Ok(endpoints) => endpoints,
            Err(e) => {
                self.set_state(TransportState::Failed);
                return Err(e);
            }
        };

        let selected = endpoints.into_iter().find(|e| {
            e.security_policy_uri.as_ref() == SecurityPolicy::None.to_uri()
                && e.security_mode == MessageSecurityMode::None
        });
        let Some(selected) = selected else {
            self.set_state(TransportState::Failed);
            return Err(ConnectionError::no_suitable_endpoint("None/None").into());
        };

        debug!(
            endpoint = %endpoint,
            security_policy = %selected.security_policy_uri,
            "Found matching endpoint"
        );

        *self.client.lock() = Some(client);
        *self.endpoint.lock() = Some((url, selected));
        self.set_state(TransportState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> OpcUaResult<()> {
        if let Some(stop) = self.session_loop.lock().take() {
            let _ = stop.send(SessionCommand::Stop);
        }
        let session = self.session.lock().take();
        if let Some(session) = session {
            blocking("disconnect", move || {
                session.read().disconnect();
                Ok(())
            })
            .await?;
        }
        self.item_routes.lock().clear();
        self.lifecycle.lock().clear();
        *self.client.lock() = None;
        self.set_state(TransportState::Disconnected);
        info!("Disconnected from OPC UA server");
        Ok(())
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn create_session(&self) -> OpcUaResult<SessionInfo> {
        let client = self.client.lock().clone().ok_or_else(OpcUaError::not_connected)?;
        let (url, endpoint) = self
            .endpoint
            .lock()
            .clone()
            .ok_or_else(OpcUaError::not_connected)?;

        let session = blocking("create_session", move || {
            client
                .lock()
                .connect_to_endpoint(endpoint, IdentityToken::Anonymous)
                .map_err(|e| SessionError::creation_failed(e.to_string()).into())
        })
        .await?;

        let lifecycle = self.lifecycle.clone();
        {
            let mut s = session.write();
            let on_status = lifecycle.clone();
            s.set_connection_status_callback(ConnectionStatusCallback::new(move |connected| {
                if !connected {
                    warn!("OPC UA connection lost");
                    RealTransport::broadcast_lifecycle(
                        &on_status,
                        SubscriptionEvent::Terminated {
                            reason: "connection lost".to_string(),
                        },
                    );
                }
            }));
            let on_closed = lifecycle;
            s.set_session_closed_callback(SessionClosedCallback::new(move |status| {
                error!(status = %status, "OPC UA session closed by server");
                RealTransport::broadcast_lifecycle(
                    &on_closed,
                    SubscriptionEvent::Terminated {
                        reason: status.to_string(),
                    },
                );
            }));
        }

        *self.session_loop.lock() = Some(Session::run_async(session.clone()));
        *self.session.lock() = Some(session);

        let info = SessionInfo {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_name: self.config.session_name.clone(),
            endpoint: url,
            revised_timeout: self.config.session_timeout,
        };
        info!(endpoint = %info.endpoint, session_id = %info.session_id, "Session activated");
        Ok(info)
    }

    async fn create_subscription(
        &self,
        _session: &SessionInfo,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionGrant> {
        let session = self.session_handle()?;
        let routes = self.item_routes.clone();
        let requested = settings.clone();

        trace!(interval = ?settings.publishing_interval, "Creating subscription");

        let subscription_id = {
            let session = session.clone();
            blocking("create_subscription", move || {
                session
                    .read()
                    .create_subscription(
                        requested.publishing_interval.as_millis() as f64,
                        requested.lifetime_count,
                        requested.keepalive_count,
                        requested.max_notifications_per_publish,
                        requested.priority,
                        requested.publishing_enabled,
                        DataChangeCallback::new(move |items| {
                            let routes = routes.lock();
                            for item in items {
                                let Some(tx) = routes.get(&item.client_handle()) else {
                                    continue;
                                };
                                let values = item.values();
                                let events = if values.is_empty() {
                                    item_events(std::slice::from_ref(item.last_value()))
                                } else {
                                    item_events(values)
                                };
                                for event in events {
                                    if tx.send(event).is_err() {
                                        break;
                                    }
                                }
                            }
                        }),
                    )
                    .map_err(|e| SubscriptionError::creation_failed(e.to_string()).into())
            })
            .await?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.lifecycle.lock().push(tx.clone());
        let keepalive_period = settings
            .publishing_interval
            .saturating_mul(settings.keepalive_count.max(1));
        self.spawn_liveness_watch(session, keepalive_period, tx);

        info!(subscription_id, "Subscription created");
        Ok(SubscriptionGrant {
            subscription_id,
            revised_publishing_interval: settings.publishing_interval,
            revised_lifetime_count: settings.lifetime_count,
            revised_keepalive_count: settings.keepalive_count,
            events: rx,
        })
    }

    async fn create_monitored_item(
        &self,
        subscription_id: u32,
        request: &MonitoredItemRequest,
    ) -> OpcUaResult<MonitoredItemGrant> {
        let session = self.session_handle()?;
        let client_handle = self.next_client_handle.fetch_add(1, Ordering::Relaxed);
        let node = request.node_id.to_string();

        // Routed before the call so the initial value is not lost. The guard
        // drops the route if this future is cancelled by the request timeout.
        let (tx, rx) = mpsc::unbounded_channel();
        let route = RouteGuard::insert(&self.item_routes, client_handle, tx);

        let create = MonitoredItemCreateRequest {
            item_to_monitor: read_value_id(&request.node_id, request.attribute),
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle,
                sampling_interval: request.settings.sampling_interval.as_millis() as f64,
                filter: ExtensionObject::null(),
                queue_size: request.settings.queue_size,
                discard_oldest: request.settings.discard_oldest,
            },
        };
        let timestamps = to_opcua_timestamps(request.timestamps);

        let result = {
            let node = node.clone();
            blocking("create_monitored_item", move || {
                let results = session
                    .read()
                    .create_monitored_items(subscription_id, timestamps, &[create])
                    .map_err(|e| MonitoringError::item_creation_failed(&node, e.to_string()))?;
                results.into_iter().next().ok_or_else(|| {
                    MonitoringError::item_creation_failed(&node, "no result returned").into()
                })
            })
            .await
        };

        let result = match result {
            Ok(r) if r.status_code.is_good() => r,
            Ok(r) => return Err(MonitoringError::bad_status(node, r.status_code.bits()).into()),
            Err(e) => return Err(e),
        };
        route.keep();

        debug!(
            node_id = %node,
            monitored_item_id = result.monitored_item_id,
            "Monitored item created"
        );
        Ok(MonitoredItemGrant {
            monitored_item_id: result.monitored_item_id,
            revised_sampling_interval: Duration::from_secs_f64(
                result.revised_sampling_interval.max(0.0) / 1000.0,
            ),
            revised_queue_size: result.revised_queue_size,
            notifications: rx,
        })
    }

    async fn read(
        &self,
        _session: &SessionInfo,
        node_id: &NodeId,
        attribute: AttributeId,
    ) -> OpcUaResult<DataValue> {
        let session = self.session_handle()?;
        let request = read_value_id(node_id, attribute);
        let node = node_id.to_string();

        trace!(node_id = %node, "Reading node value");

        blocking("read", move || {
            let results = session
                .read()
                .read(&[request], opcua::types::TimestampsToReturn::Both, 0.0)
                .map_err(|e| ReadError::failed(&node, e.to_string()))?;
            Ok(results
                .first()
                .map(from_opcua_data_value)
                .unwrap_or_else(DataValue::empty))
        })
        .await
    }

    async fn browse(
        &self,
        _session: &SessionInfo,
        node_id: &NodeId,
    ) -> OpcUaResult<Vec<BrowseReference>> {
        let session = self.session_handle()?;
        let node = node_id.to_string();
        let description = BrowseDescription {
            node_id: to_opcua_node_id(node_id),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };

        trace!(node_id = %node, "Browsing node");

        blocking("browse", move || {
            let results = session
                .read()
                .browse(&[description])
                .map_err(|e| BrowseError::failed(&node, e.to_string()))?
                .unwrap_or_default();
            let references = results
                .into_iter()
                .next()
                .and_then(|r| r.references)
                .unwrap_or_default();
            Ok(references
                .iter()
                .map(|r| {
                    BrowseReference::new(
                        from_opcua_node_id(&r.node_id.node_id),
                        r.browse_name.name.as_ref(),
                        r.display_name.text.as_ref(),
                        NodeClass::from_value(r.node_class as u32),
                    )
                    .with_reference_type(from_opcua_node_id(&r.reference_type_id))
                })
                .collect())
        })
        .await
    }

    fn display_name(&self) -> String {
        format!("RealTransport({})", self.config.application_name)
    }
}
