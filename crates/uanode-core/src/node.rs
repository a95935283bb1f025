//! Address-space nodes.

use crate::model::{AccessLevel, DataType, DataValue, StatusCode, ValueRank, Variant};
use crate::node_id::NodeId;
use crate::source::ValueSource;
use serde::{Deserialize, Serialize};

/// Node class as reported to browsing clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeClass {
    Folder,
    Variable,
}

/// An entry in the address space.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub browse_name: String,
    /// Human-readable name; the browse name unless set explicitly.
    pub display_name: String,
    /// None only for the root folder.
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub enum NodeKind {
    Folder,
    Variable(Variable),
}

impl Node {
    pub fn node_class(&self) -> NodeClass {
        match self.kind {
            NodeKind::Folder => NodeClass::Folder,
            NodeKind::Variable(_) => NodeClass::Variable,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match &self.kind {
            NodeKind::Variable(v) => Some(v),
            NodeKind::Folder => None,
        }
    }
}

/// A variable node's metadata and value source.
#[derive(Debug)]
pub struct Variable {
    pub data_type: DataType,
    pub value_rank: ValueRank,
    pub array_dimension: Option<u32>,
    pub access: AccessLevel,
    /// Fastest rate, in milliseconds, at which this variable should be sampled.
    pub minimum_sampling_interval_ms: Option<u64>,
    pub source: ValueSource,
}

impl Variable {
    /// Read the current value, enforcing the declared type and shape.
    ///
    /// A source that produces a value of the wrong type is reported as
    /// `BAD_SOURCE`, so clients never observe a mistyped value.
    pub fn read(&self) -> DataValue {
        let dv = self.source.read();
        if dv.status.is_bad() || self.accepts(&dv.value) {
            return dv;
        }
        tracing::warn!(
            "source produced {} for a {:?} variable",
            dv.value,
            self.data_type
        );
        DataValue::bad(StatusCode::BAD_SOURCE, dv.source_timestamp)
    }

    /// Whether `value` matches this variable's declared type and shape.
    pub fn accepts(&self, value: &Variant) -> bool {
        value.conforms_to(self.data_type, self.value_rank, self.array_dimension)
    }
}

/// Definition of a variable to add to the store.
#[derive(Debug)]
pub struct VariableSpec {
    /// Explicit id; when `None` the store assigns a numeric one.
    pub node_id: Option<NodeId>,
    pub browse_name: String,
    pub display_name: Option<String>,
    pub data_type: DataType,
    pub value_rank: ValueRank,
    pub array_dimension: Option<u32>,
    pub access: AccessLevel,
    pub minimum_sampling_interval_ms: Option<u64>,
    pub source: ValueSource,
}

impl VariableSpec {
    /// A read-only scalar variable.
    pub fn new(browse_name: impl Into<String>, data_type: DataType, source: ValueSource) -> Self {
        Self {
            node_id: None,
            browse_name: browse_name.into(),
            display_name: None,
            data_type,
            value_rank: ValueRank::Scalar,
            array_dimension: None,
            access: AccessLevel::READ_ONLY,
            minimum_sampling_interval_ms: None,
            source,
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Make this a one-dimensional array of `dimension` elements (0 = any length).
    pub fn array(mut self, dimension: u32) -> Self {
        self.value_rank = ValueRank::OneDimension;
        self.array_dimension = Some(dimension);
        self
    }

    pub fn access(mut self, access: AccessLevel) -> Self {
        self.access = access;
        self
    }

    pub fn minimum_sampling_interval(mut self, ms: u64) -> Self {
        self.minimum_sampling_interval_ms = Some(ms);
        self
    }
}
