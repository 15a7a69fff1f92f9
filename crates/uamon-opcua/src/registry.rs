// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Registry of constructed monitored nodes.
//!
//! The registry is owned by the composition root and passed by reference to
//! every [`MonitoredNode::new`](crate::node::MonitoredNode::new) call. It is
//! append-only and keeps construction order.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::node::MonitoredNode;

/// Ordered, append-only collection of monitored nodes.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<Arc<MonitoredNode>>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node. Called once per node by its constructor.
    pub fn register(&self, node: Arc<MonitoredNode>) {
        tracing::trace!(node_id = %node.identifier(), "Node registered");
        self.nodes.write().push(node);
    }

    /// Returns every registered node in construction order.
    ///
    /// The returned `Vec` is a snapshot; calling again restarts iteration.
    pub fn all(&self) -> Vec<Arc<MonitoredNode>> {
        self.nodes.read().clone()
    }

    /// Returns the node registered at `index`.
    pub fn get(&self, index: usize) -> Option<Arc<MonitoredNode>> {
        self.nodes.read().get(index).cloned()
    }

    /// Returns the first node with the given identifier.
    pub fn find(&self, identifier: &str) -> Option<Arc<MonitoredNode>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.identifier() == identifier)
            .cloned()
    }

    /// Returns the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Returns `true` if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identifiers: Vec<String> = self
            .nodes
            .read()
            .iter()
            .map(|n| n.identifier().to_string())
            .collect();
        f.debug_struct("NodeRegistry")
            .field("nodes", &identifiers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SessionController;

    #[test]
    fn test_construction_order_is_kept() {
        let controller = SessionController::new(None, None);
        let registry = NodeRegistry::new();
        assert!(registry.is_empty());

        let a = MonitoredNode::new("ns=1;s=A", &controller, &registry);
        let b = MonitoredNode::new("ns=1;s=B", &controller, &registry);
        let c = MonitoredNode::new("ns=1;s=A", &controller, &registry);

        let all = registry.all();
        assert_eq!(all.len(), 3);
        assert!(Arc::ptr_eq(&all[0], &a));
        assert!(Arc::ptr_eq(&all[1], &b));
        assert!(Arc::ptr_eq(&all[2], &c));

        // Iteration restarts from the beginning.
        assert_eq!(registry.all()[0].identifier(), "ns=1;s=A");
        assert!(Arc::ptr_eq(&registry.find("ns=1;s=A").unwrap(), &a));
        assert!(registry.get(3).is_none());
    }

    #[test]
    fn test_registries_are_isolated() {
        let controller = SessionController::new(None, None);
        let first = NodeRegistry::new();
        let second = NodeRegistry::new();

        MonitoredNode::new("ns=1;s=A", &controller, &first);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
