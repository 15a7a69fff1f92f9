// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared session handle.
//!
//! A [`Session`] is created once by the controller and handed out as an
//! `Arc` to every node that needs to read through it. It carries the
//! server-side identity plus the transport it was created on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::browse::BrowseReference;
use crate::client::transport::{OpcUaTransport, SessionInfo};
use crate::client::with_timeout;
use crate::error::OpcUaResult;
use crate::types::{AttributeId, DataValue, NodeId};

/// An established OPC UA session.
pub struct Session {
    transport: Arc<dyn OpcUaTransport>,
    info: SessionInfo,
    request_timeout: Option<Duration>,
    created_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        transport: Arc<dyn OpcUaTransport>,
        info: SessionInfo,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            info,
            request_timeout,
            created_at: Utc::now(),
        }
    }

    /// Returns the server-side session identity.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Returns the server-assigned session id.
    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    /// Returns the endpoint the session runs on.
    pub fn endpoint(&self) -> &str {
        &self.info.endpoint
    }

    /// Returns when the session was established.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Reads one attribute of a node.
    pub async fn read(&self, node_id: &NodeId, attribute: AttributeId) -> OpcUaResult<DataValue> {
        with_timeout(
            "read",
            self.request_timeout,
            self.transport.read(&self.info, node_id, attribute),
        )
        .await
    }

    /// Browses the forward hierarchical references of a node.
    pub async fn browse(&self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        with_timeout(
            "browse",
            self.request_timeout,
            self.transport.browse(&self.info, node_id),
        )
        .await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.info.session_id)
            .field("endpoint", &self.info.endpoint)
            .field("transport", &self.transport.display_name())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::ScriptedTransport;
    use crate::types::OpcUaValue;

    async fn session_on(transport: Arc<ScriptedTransport>) -> Session {
        transport.connect("opc.tcp://localhost:4840").await.unwrap();
        let info = transport.create_session().await.unwrap();
        Session::new(transport, info, Some(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_read_goes_through_transport() {
        let transport = Arc::new(ScriptedTransport::new());
        let node = NodeId::string(1, "Var1");
        transport.set_value(&node, DataValue::new(OpcUaValue::Int32(42)));

        let session = session_on(transport.clone()).await;
        let value = session.read(&node, AttributeId::Value).await.unwrap();

        assert_eq!(value.value, Some(OpcUaValue::Int32(42)));
        assert_eq!(session.endpoint(), "opc.tcp://localhost:4840");
        assert_eq!(transport.call_count("read"), 1);
    }

    #[tokio::test]
    async fn test_debug_omits_transport_internals() {
        let session = session_on(Arc::new(ScriptedTransport::new())).await;
        let debug = format!("{:?}", session);
        assert!(debug.contains("session_id"));
        assert!(debug.contains("ScriptedTransport"));
    }
}
