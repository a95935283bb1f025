//! Address-space node store.
//!
//! The store holds the tree of folders and variables. It is built once
//! before the server accepts connections and is read-only in structure
//! afterwards, so the server shares it as a plain `Arc` with no lock.
//! Value changes go through each variable's own [`ValueSource`].

use crate::model::{DataType, DataValue, StatusCode, ValueRank, Variant};
use crate::node::{Node, NodeKind, Variable, VariableSpec};
use crate::node_id::{Identifier, NodeId, APP_NAMESPACE};
use crate::source::ValueSource;
use std::collections::HashMap;
use thiserror::Error;

/// First numeric identifier handed out for nodes created without an id.
const FIRST_AUTO_ID: u32 = 1000;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("node {0} not found")]
    NotFound(NodeId),

    #[error("node id {0} already exists")]
    DuplicateNodeId(NodeId),

    #[error("node {0} is not a folder")]
    NotAFolder(NodeId),

    #[error("invalid variable spec: {0}")]
    InvalidSpec(String),

    #[error("node {0} is not readable")]
    NotReadable(NodeId),

    #[error("node {0} is not writable")]
    NotWritable(NodeId),

    #[error("value does not match {expected:?} declared on {node_id}")]
    TypeMismatch { node_id: NodeId, expected: DataType },
}

impl StoreError {
    /// Wire status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NotFound(_) => StatusCode::BAD_NODE_ID_UNKNOWN,
            StoreError::DuplicateNodeId(_) => StatusCode::BAD_NODE_ID_EXISTS,
            StoreError::NotAFolder(_) => StatusCode::BAD_INVALID_ARGUMENT,
            StoreError::InvalidSpec(_) => StatusCode::BAD_INVALID_ARGUMENT,
            StoreError::NotReadable(_) => StatusCode::BAD_NOT_READABLE,
            StoreError::NotWritable(_) => StatusCode::BAD_NOT_WRITABLE,
            StoreError::TypeMismatch { .. } => StatusCode::BAD_TYPE_MISMATCH,
        }
    }
}

/// Trait for address-space storage implementations.
pub trait NodeStore: Send + Sync {
    /// Add a folder with an auto-assigned id under `parent`.
    fn add_folder(&mut self, parent: &NodeId, browse_name: &str) -> Result<NodeId, StoreError>;

    /// Add a folder with an explicit id under `parent`.
    fn add_folder_with_id(
        &mut self,
        parent: &NodeId,
        node_id: NodeId,
        browse_name: &str,
    ) -> Result<NodeId, StoreError>;

    /// Add a variable under `parent`.
    fn add_variable(&mut self, parent: &NodeId, spec: VariableSpec) -> Result<NodeId, StoreError>;

    /// Look up a node.
    fn get(&self, node_id: &NodeId) -> Result<&Node, StoreError>;

    /// Direct children of a node, in insertion order.
    fn children(&self, node_id: &NodeId) -> Result<Vec<&Node>, StoreError>;

    /// Read a variable's current value.
    fn read(&self, node_id: &NodeId) -> Result<DataValue, StoreError>;

    /// Replace the value of a writable, statically sourced variable.
    fn write(&self, node_id: &NodeId, value: Variant) -> Result<(), StoreError>;

    /// Total number of nodes, root included.
    fn node_count(&self) -> usize;
}

/// In-memory node store.
#[derive(Debug)]
pub struct MemoryNodeStore {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    next_auto_id: u32,
}

impl MemoryNodeStore {
    /// Create a store containing `RootFolder` and `ObjectsFolder`.
    pub fn new() -> Self {
        let root = NodeId::root_folder();
        let objects = NodeId::objects_folder();

        let mut store = Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            next_auto_id: FIRST_AUTO_ID,
        };
        store.nodes.insert(
            root.clone(),
            Node {
                id: root.clone(),
                browse_name: "Root".to_string(),
                display_name: "Root".to_string(),
                parent: None,
                kind: NodeKind::Folder,
            },
        );
        store.children.insert(root.clone(), vec![objects.clone()]);
        store.nodes.insert(
            objects.clone(),
            Node {
                id: objects.clone(),
                browse_name: "Objects".to_string(),
                display_name: "Objects".to_string(),
                parent: Some(root),
                kind: NodeKind::Folder,
            },
        );
        store.children.insert(objects, Vec::new());
        store
    }

    /// Next unused numeric id in the application namespace.
    fn allocate_id(&mut self) -> NodeId {
        loop {
            let candidate = NodeId::numeric(APP_NAMESPACE, self.next_auto_id);
            self.next_auto_id += 1;
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn check_parent(&self, parent: &NodeId) -> Result<(), StoreError> {
        let node = self
            .nodes
            .get(parent)
            .ok_or_else(|| StoreError::NotFound(parent.clone()))?;
        if !node.is_folder() {
            return Err(StoreError::NotAFolder(parent.clone()));
        }
        Ok(())
    }

    fn insert(&mut self, parent: &NodeId, node: Node) -> NodeId {
        let id = node.id.clone();
        self.children
            .entry(parent.clone())
            .or_default()
            .push(id.clone());
        if node.is_folder() {
            self.children.insert(id.clone(), Vec::new());
        }
        self.nodes.insert(id.clone(), node);
        id
    }

    fn validate_spec(spec: &VariableSpec) -> Result<(), StoreError> {
        if spec.browse_name.trim().is_empty() {
            return Err(StoreError::InvalidSpec("browse name is empty".to_string()));
        }
        if spec.value_rank == ValueRank::Scalar && spec.array_dimension.is_some() {
            return Err(StoreError::InvalidSpec(format!(
                "scalar variable '{}' declares an array dimension",
                spec.browse_name
            )));
        }

        // Static values are checked directly. Computed ones are evaluated once;
        // a transient failure is accepted, a mistyped result is not.
        let initial = match &spec.source {
            ValueSource::Static(s) => s.value(),
            ValueSource::Computed(c) => {
                let dv = c.read();
                dv.status.is_good().then_some(dv.value)
            }
        };
        if let Some(value) = initial {
            if !value.conforms_to(spec.data_type, spec.value_rank, spec.array_dimension) {
                return Err(StoreError::InvalidSpec(format!(
                    "'{}' declared {:?} ({:?}) but initial value is {}",
                    spec.browse_name, spec.data_type, spec.value_rank, value
                )));
            }
        }
        Ok(())
    }

    fn variable(&self, node_id: &NodeId) -> Result<&Variable, StoreError> {
        self.get(node_id)?
            .as_variable()
            .ok_or_else(|| StoreError::NotReadable(node_id.clone()))
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn add_folder(&mut self, parent: &NodeId, browse_name: &str) -> Result<NodeId, StoreError> {
        self.check_parent(parent)?;
        let id = self.allocate_id();
        self.add_folder_with_id(parent, id, browse_name)
    }

    fn add_folder_with_id(
        &mut self,
        parent: &NodeId,
        node_id: NodeId,
        browse_name: &str,
    ) -> Result<NodeId, StoreError> {
        self.check_parent(parent)?;
        if self.nodes.contains_key(&node_id) {
            return Err(StoreError::DuplicateNodeId(node_id));
        }
        Ok(self.insert(
            parent,
            Node {
                id: node_id,
                browse_name: browse_name.to_string(),
                display_name: browse_name.to_string(),
                parent: Some(parent.clone()),
                kind: NodeKind::Folder,
            },
        ))
    }

    fn add_variable(&mut self, parent: &NodeId, spec: VariableSpec) -> Result<NodeId, StoreError> {
        self.check_parent(parent)?;
        Self::validate_spec(&spec)?;

        let id = match spec.node_id {
            Some(id) => {
                if self.nodes.contains_key(&id) {
                    return Err(StoreError::DuplicateNodeId(id));
                }
                id
            }
            None => self.allocate_id(),
        };

        let display_name = spec
            .display_name
            .unwrap_or_else(|| spec.browse_name.clone());
        Ok(self.insert(
            parent,
            Node {
                id: id.clone(),
                browse_name: spec.browse_name,
                display_name,
                parent: Some(parent.clone()),
                kind: NodeKind::Variable(Variable {
                    data_type: spec.data_type,
                    value_rank: spec.value_rank,
                    array_dimension: spec.array_dimension,
                    access: spec.access,
                    minimum_sampling_interval_ms: spec.minimum_sampling_interval_ms,
                    source: spec.source,
                }),
            },
        ))
    }

    fn get(&self, node_id: &NodeId) -> Result<&Node, StoreError> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| StoreError::NotFound(node_id.clone()))
    }

    fn children(&self, node_id: &NodeId) -> Result<Vec<&Node>, StoreError> {
        self.get(node_id)?;
        Ok(self
            .children
            .get(node_id)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default())
    }

    fn read(&self, node_id: &NodeId) -> Result<DataValue, StoreError> {
        let var = self.variable(node_id)?;
        if !var.access.readable {
            return Err(StoreError::NotReadable(node_id.clone()));
        }
        Ok(var.read())
    }

    fn write(&self, node_id: &NodeId, value: Variant) -> Result<(), StoreError> {
        let var = self
            .get(node_id)?
            .as_variable()
            .ok_or_else(|| StoreError::NotWritable(node_id.clone()))?;

        let ValueSource::Static(source) = &var.source else {
            return Err(StoreError::NotWritable(node_id.clone()));
        };
        if !var.access.writable {
            return Err(StoreError::NotWritable(node_id.clone()));
        }
        if !var.accepts(&value) {
            return Err(StoreError::TypeMismatch {
                node_id: node_id.clone(),
                expected: var.data_type,
            });
        }
        source
            .set(value)
            .map_err(|_| StoreError::NotWritable(node_id.clone()))
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessLevel;
    use crate::source::SourceError;
    use pretty_assertions::assert_eq;

    fn device_store() -> (MemoryNodeStore, NodeId) {
        let mut store = MemoryNodeStore::new();
        let device = store
            .add_folder(&NodeId::objects_folder(), "MyDevice")
            .unwrap();
        (store, device)
    }

    #[test]
    fn test_new_store() {
        let store = MemoryNodeStore::new();
        assert_eq!(store.node_count(), 2);

        let root = store.get(&NodeId::root_folder()).unwrap();
        assert!(root.parent.is_none());

        let objects = store.get(&NodeId::objects_folder()).unwrap();
        assert_eq!(objects.parent, Some(NodeId::root_folder()));
        assert_eq!(objects.browse_name, "Objects");
    }

    #[test]
    fn test_add_folder_assigns_app_namespace_id() {
        let (store, device) = device_store();
        assert_eq!(device.namespace, APP_NAMESPACE);

        let node = store.get(&device).unwrap();
        assert!(node.is_folder());
        assert_eq!(node.browse_name, "MyDevice");
        assert_eq!(node.parent, Some(NodeId::objects_folder()));
    }

    #[test]
    fn test_add_variable_keeps_type_and_shape() {
        let (mut store, device) = device_store();
        let id = store
            .add_variable(
                &device,
                VariableSpec::new(
                    "MyVariable3",
                    DataType::Double,
                    ValueSource::Static(crate::source::StaticValue::new(Variant::double_array(
                        &[1.0, 2.0, 3.0],
                    ))),
                )
                .array(3)
                .access(AccessLevel::READ_WRITE),
            )
            .unwrap();

        let var = store.get(&id).unwrap().as_variable().unwrap();
        assert_eq!(var.data_type, DataType::Double);
        assert_eq!(var.value_rank, ValueRank::OneDimension);
        assert_eq!(var.array_dimension, Some(3));
        assert!(var.access.writable);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let (mut store, device) = device_store();
        let id = NodeId::string(APP_NAMESPACE, "Temperature");
        store
            .add_variable(
                &device,
                VariableSpec::new("Temperature", DataType::Double, ValueSource::fixed(1.0))
                    .with_node_id(id.clone()),
            )
            .unwrap();

        let err = store
            .add_variable(
                &device,
                VariableSpec::new("Other", DataType::Double, ValueSource::fixed(2.0))
                    .with_node_id(id.clone()),
            )
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateNodeId(id));
    }

    #[test]
    fn test_display_name_defaults_to_browse_name() {
        let mut store = MemoryNodeStore::new();
        let objects = NodeId::objects_folder();
        let device = store.add_folder(&objects, "MyDevice").unwrap();
        let plain = store
            .add_variable(&device, VariableSpec::new("t", DataType::Double, ValueSource::fixed(1.0)))
            .unwrap();
        let named = store
            .add_variable(
                &device,
                VariableSpec::new("t2", DataType::Double, ValueSource::fixed(2.0))
                    .display_name("Outside temperature"),
            )
            .unwrap();

        assert_eq!(store.get(&device).unwrap().display_name, "MyDevice");
        assert_eq!(store.get(&plain).unwrap().display_name, "t");
        assert_eq!(store.get(&named).unwrap().display_name, "Outside temperature");
    }

    #[test]
    fn test_duplicate_browse_names_allowed() {
        let (mut store, device) = device_store();
        store
            .add_variable(&device, VariableSpec::new("x", DataType::Boolean, ValueSource::fixed(true)))
            .unwrap();
        store
            .add_variable(&device, VariableSpec::new("x", DataType::Boolean, ValueSource::fixed(false)))
            .unwrap();
        assert_eq!(store.children(&device).unwrap().len(), 2);
    }

    #[test]
    fn test_auto_ids_skip_taken_ids() {
        let mut store = MemoryNodeStore::new();
        let taken = NodeId::numeric(APP_NAMESPACE, FIRST_AUTO_ID);
        store
            .add_folder_with_id(&NodeId::objects_folder(), taken.clone(), "Taken")
            .unwrap();
        let next = store.add_folder(&NodeId::objects_folder(), "Next").unwrap();
        assert_ne!(next, taken);
    }

    #[test]
    fn test_unknown_parent_and_non_folder_parent() {
        let (mut store, device) = device_store();
        let missing = NodeId::string(APP_NAMESPACE, "missing");
        assert_eq!(
            store.add_folder(&missing, "x").unwrap_err(),
            StoreError::NotFound(missing)
        );

        let var = store
            .add_variable(&device, VariableSpec::new("v", DataType::Int32, ValueSource::fixed(1)))
            .unwrap();
        assert_eq!(
            store.add_folder(&var, "x").unwrap_err(),
            StoreError::NotAFolder(var)
        );
    }

    #[test]
    fn test_invalid_spec_type_disagreement() {
        let (mut store, device) = device_store();
        let err = store
            .add_variable(
                &device,
                VariableSpec::new("bad", DataType::Double, ValueSource::fixed("text")),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec(_)));

        let err = store
            .add_variable(
                &device,
                VariableSpec::new(
                    "short",
                    DataType::Double,
                    ValueSource::fixed(Variant::double_array(&[1.0, 2.0])),
                )
                .array(3),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec(_)));
        // nothing was inserted
        assert!(store.children(&device).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_spec_for_mistyped_computed_source() {
        let (mut store, device) = device_store();
        let err = store
            .add_variable(
                &device,
                VariableSpec::new("c", DataType::Boolean, ValueSource::computed(|| Ok(1.5.into()))),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec(_)));

        // a failing computed source is accepted at construction time
        store
            .add_variable(
                &device,
                VariableSpec::new(
                    "flaky",
                    DataType::Double,
                    ValueSource::computed(|| Err(SourceError::Unavailable("x".into()))),
                ),
            )
            .unwrap();
    }

    #[test]
    fn test_read_computed_does_not_change_tree() {
        let (mut store, device) = device_store();
        let id = store
            .add_variable(
                &device,
                VariableSpec::new("t", DataType::Double, ValueSource::computed(|| Ok(42.0.into()))),
            )
            .unwrap();
        let before = store.node_count();
        for _ in 0..10 {
            assert_eq!(store.read(&id).unwrap().value, Variant::Double(42.0));
        }
        assert_eq!(store.node_count(), before);
        assert_eq!(store.children(&device).unwrap().len(), 1);
    }

    #[test]
    fn test_read_errors() {
        let (store, device) = device_store();
        assert_eq!(
            store.read(&device).unwrap_err(),
            StoreError::NotReadable(device.clone())
        );
        let missing = NodeId::numeric(APP_NAMESPACE, 9999);
        assert_eq!(
            store.read(&missing).unwrap_err().status_code(),
            StatusCode::BAD_NODE_ID_UNKNOWN
        );
    }

    #[test]
    fn test_one_failing_source_does_not_affect_others() {
        let (mut store, device) = device_store();
        let bad = store
            .add_variable(
                &device,
                VariableSpec::new(
                    "bad",
                    DataType::Double,
                    ValueSource::computed(|| Err(SourceError::Evaluation("boom".into()))),
                ),
            )
            .unwrap();
        let good = store
            .add_variable(&device, VariableSpec::new("good", DataType::Double, ValueSource::fixed(1.0)))
            .unwrap();

        assert_eq!(store.read(&bad).unwrap().status, StatusCode::BAD_SOURCE);
        assert_eq!(store.read(&good).unwrap().status, StatusCode::GOOD);
    }

    #[test]
    fn test_write() {
        let (mut store, device) = device_store();
        let rw = store
            .add_variable(
                &device,
                VariableSpec::new(
                    "rw",
                    DataType::Double,
                    ValueSource::fixed(Variant::double_array(&[1.0, 2.0, 3.0])),
                )
                .array(3)
                .access(AccessLevel::READ_WRITE),
            )
            .unwrap();
        let ro = store
            .add_variable(&device, VariableSpec::new("ro", DataType::String, ValueSource::fixed("a")))
            .unwrap();
        let computed = store
            .add_variable(
                &device,
                VariableSpec::new("c", DataType::Boolean, ValueSource::computed(|| Ok(true.into())))
                    .access(AccessLevel::READ_WRITE),
            )
            .unwrap();

        store
            .write(&rw, Variant::double_array(&[4.0, 5.0, 6.0]))
            .unwrap();
        assert_eq!(
            store.read(&rw).unwrap().value,
            Variant::double_array(&[4.0, 5.0, 6.0])
        );

        assert!(matches!(
            store.write(&rw, Variant::double_array(&[1.0])),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert_eq!(
            store.write(&ro, "b".into()),
            Err(StoreError::NotWritable(ro.clone()))
        );
        assert_eq!(
            store.write(&computed, false.into()),
            Err(StoreError::NotWritable(computed.clone()))
        );
    }
}
