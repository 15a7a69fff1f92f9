// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Browse results.
//!
//! The controller asks the transport for the forward hierarchical references
//! of a node (by default the `RootFolder`) and keeps them as a list of
//! [`BrowseReference`]s. This is enough to discover which variables a server
//! exposes before configuring the nodes to monitor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

// =============================================================================
// Standard Reference Type Node IDs
// =============================================================================

/// Standard OPC UA reference type node IDs.
pub mod reference_types {
    use crate::types::NodeId;

    /// HierarchicalReferences (`i=33`), the type every browse follows.
    pub fn hierarchical_references() -> NodeId {
        NodeId::numeric(0, 33)
    }

    /// Organizes (`i=35`).
    pub fn organizes() -> NodeId {
        NodeId::numeric(0, 35)
    }

    /// HasComponent (`i=47`).
    pub fn has_component() -> NodeId {
        NodeId::numeric(0, 47)
    }

    /// HasProperty (`i=46`).
    pub fn has_property() -> NodeId {
        NodeId::numeric(0, 46)
    }
}

// =============================================================================
// NodeClass
// =============================================================================

/// OPC UA node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Object node.
    Object,
    /// Variable node.
    Variable,
    /// Method node.
    Method,
    /// Object type node.
    ObjectType,
    /// Variable type node.
    VariableType,
    /// Reference type node.
    ReferenceType,
    /// Data type node.
    DataType,
    /// View node.
    View,
}

impl NodeClass {
    /// Returns the OPC UA bit mask value.
    pub const fn value(&self) -> u32 {
        match self {
            Self::Object => 1,
            Self::Variable => 2,
            Self::Method => 4,
            Self::ObjectType => 8,
            Self::VariableType => 16,
            Self::ReferenceType => 32,
            Self::DataType => 64,
            Self::View => 128,
        }
    }

    /// Creates from the OPC UA bit mask value.
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Object),
            2 => Some(Self::Variable),
            4 => Some(Self::Method),
            8 => Some(Self::ObjectType),
            16 => Some(Self::VariableType),
            32 => Some(Self::ReferenceType),
            64 => Some(Self::DataType),
            128 => Some(Self::View),
            _ => None,
        }
    }

    /// Returns `true` if nodes of this class carry a value.
    pub const fn has_value(&self) -> bool {
        matches!(self, Self::Variable | Self::VariableType)
    }

    /// Returns the class name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Variable => "Variable",
            Self::Method => "Method",
            Self::ObjectType => "ObjectType",
            Self::VariableType => "VariableType",
            Self::ReferenceType => "ReferenceType",
            Self::DataType => "DataType",
            Self::View => "View",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// BrowseReference
// =============================================================================

/// One reference returned by a browse request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseReference {
    /// Target node.
    pub node_id: NodeId,

    /// Browse name, without namespace prefix.
    pub browse_name: String,

    /// Display name text.
    pub display_name: String,

    /// Target node class, when the server reported a known one.
    pub node_class: Option<NodeClass>,

    /// Reference type followed to reach the target.
    pub reference_type: Option<NodeId>,
}

impl BrowseReference {
    /// Creates a reference.
    pub fn new(
        node_id: NodeId,
        browse_name: impl Into<String>,
        display_name: impl Into<String>,
        node_class: Option<NodeClass>,
    ) -> Self {
        Self {
            node_id,
            browse_name: browse_name.into(),
            display_name: display_name.into(),
            node_class,
            reference_type: None,
        }
    }

    /// Sets the reference type.
    pub fn with_reference_type(mut self, reference_type: NodeId) -> Self {
        self.reference_type = Some(reference_type);
        self
    }

    /// Returns `true` if the target is a variable that can be monitored.
    pub fn is_variable(&self) -> bool {
        self.node_class.is_some_and(|c| c.has_value())
    }
}

impl fmt::Display for BrowseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = self.node_class.map(|c| c.name()).unwrap_or("Unknown");
        write!(
            f,
            "{} [{}] {} ({})",
            self.node_id, class, self.browse_name, self.display_name
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_class_roundtrip_values() {
        assert_eq!(NodeClass::from_value(2), Some(NodeClass::Variable));
        assert_eq!(NodeClass::from_value(3), None);
        assert_eq!(NodeClass::View.value(), 128);
    }

    #[test]
    fn test_reference_display() {
        let reference = BrowseReference::new(
            NodeId::numeric(0, 85),
            "Objects",
            "Objects",
            Some(NodeClass::Object),
        )
        .with_reference_type(reference_types::organizes());

        assert_eq!(reference.to_string(), "i=85 [Object] Objects (Objects)");
        assert!(!reference.is_variable());
    }

    #[test]
    fn test_unknown_class_is_not_variable() {
        let reference = BrowseReference::new(NodeId::string(1, "X"), "X", "X", None);
        assert!(!reference.is_variable());
        assert!(reference.to_string().contains("[Unknown]"));
    }
}
