//! Arena-style node store.
//!
//! Nodes live in one table keyed by [`NodeId`]; references are kept as
//! adjacency lists of ids (forward lists per source, inverse lists per
//! target), never as pointers between nodes. A single reader-writer lock
//! guards the whole graph: mutations serialize behind the writer, reads
//! run concurrently with each other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{UaError, UaResult};
use crate::node::{
    DataTypeAttributes, NewNode, Node, NodeAttributes, NodeClass, ObjectAttributes,
    ObjectTypeAttributes, ReferenceTypeAttributes, VariableAttributes, VariableTypeAttributes,
    describe_data_type, value_matches, value_rank,
};
use crate::types::ids::{data_type_ids, is_hierarchical, object_ids, reference_ids, type_ids};
use crate::types::{AttributeId, LocalizedText, NodeId, QualifiedName, Variant, ns0};

/// URI of namespace 0.
pub const OPC_UA_NAMESPACE: &str = "http://opcfoundation.org/UA/";

/// A directed, typed edge as seen from one of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub source: NodeId,
    pub target: NodeId,
    pub reference_type: NodeId,
    /// `true` when read from the source's side.
    pub is_forward: bool,
}

/// Which side of a node's references to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseDirection {
    Forward,
    Inverse,
    Both,
}

#[derive(Debug, Clone)]
pub(crate) struct Edge {
    pub(crate) reference_type: NodeId,
    pub(crate) other: NodeId,
    /// Global insertion sequence, used as a stable iteration cursor.
    pub(crate) seq: u64,
}

#[derive(Debug)]
pub(crate) struct NodeEntry {
    pub(crate) node: Node,
    /// Replaced by a fresh store-wide epoch on every successful Value write.
    pub(crate) value_epoch: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Store {
    pub(crate) nodes: HashMap<NodeId, NodeEntry>,
    forward: HashMap<NodeId, Vec<Edge>>,
    inverse: HashMap<NodeId, Vec<Edge>>,
    namespaces: Vec<String>,
    next_numeric: HashMap<u16, u32>,
    next_seq: u64,
    /// Last value epoch handed out; epochs are never reused across nodes.
    last_epoch: u64,
}

impl Store {
    pub(crate) fn entry(&self, id: &NodeId) -> UaResult<&NodeEntry> {
        self.nodes.get(id).ok_or_else(|| UaError::NotFound(id.clone()))
    }

    pub(crate) fn entry_mut(&mut self, id: &NodeId) -> UaResult<&mut NodeEntry> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| UaError::NotFound(id.clone()))
    }

    /// Next value epoch, strictly greater than every epoch handed out before.
    pub(crate) fn fresh_epoch(&mut self) -> u64 {
        self.last_epoch += 1;
        self.last_epoch
    }

    fn insert(&mut self, node: Node) {
        let value_epoch = self.fresh_epoch();
        self.nodes
            .insert(node.node_id.clone(), NodeEntry { node, value_epoch });
    }

    fn link(&mut self, source: &NodeId, reference_type: &NodeId, target: &NodeId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.forward.entry(source.clone()).or_default().push(Edge {
            reference_type: reference_type.clone(),
            other: target.clone(),
            seq,
        });
        self.inverse.entry(target.clone()).or_default().push(Edge {
            reference_type: reference_type.clone(),
            other: source.clone(),
            seq,
        });
    }

    fn unlink(&mut self, source: &NodeId, reference_type: &NodeId, target: &NodeId) -> bool {
        let mut removed = false;
        if let Some(edges) = self.forward.get_mut(source) {
            let before = edges.len();
            edges.retain(|e| !(e.other == *target && e.reference_type == *reference_type));
            removed = edges.len() != before;
        }
        if let Some(edges) = self.inverse.get_mut(target) {
            edges.retain(|e| !(e.other == *source && e.reference_type == *reference_type));
        }
        removed
    }

    fn has_edge(&self, source: &NodeId, reference_type: &NodeId, target: &NodeId) -> bool {
        self.forward.get(source).is_some_and(|edges| {
            edges
                .iter()
                .any(|e| e.other == *target && e.reference_type == *reference_type)
        })
    }

    /// `true` when `type_id` equals `super_type` or reaches it through
    /// inverse HasSubtype references.
    pub(crate) fn is_subtype_of(&self, type_id: &NodeId, super_type: &NodeId) -> bool {
        let has_subtype = ns0(reference_ids::HAS_SUBTYPE);
        let mut current = type_id.clone();
        let mut visited = HashSet::new();
        loop {
            if current == *super_type {
                return true;
            }
            if !visited.insert(current.clone()) {
                return false;
            }
            let parent = self.inverse.get(&current).and_then(|edges| {
                edges
                    .iter()
                    .find(|e| e.reference_type == has_subtype)
                    .map(|e| e.other.clone())
            });
            match parent {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    pub(crate) fn is_hierarchical_type(&self, reference_type: &NodeId) -> bool {
        is_hierarchical(reference_type)
            || self.is_subtype_of(
                reference_type,
                &ns0(reference_ids::HIERARCHICAL_REFERENCES),
            )
    }

    /// Breadth-first search along forward hierarchical references.
    fn reaches(&self, from: &NodeId, to: &NodeId) -> bool {
        let mut queue = VecDeque::from([from.clone()]);
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == *to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(edges) = self.forward.get(&current) {
                queue.extend(
                    edges
                        .iter()
                        .filter(|e| self.is_hierarchical_type(&e.reference_type))
                        .map(|e| e.other.clone()),
                );
            }
        }
        false
    }

    /// `true` when `ancestor` reaches `node` through forward hierarchical references.
    pub(crate) fn is_descendant(&self, node: &NodeId, ancestor: &NodeId) -> bool {
        self.reaches(ancestor, node)
    }

    fn generate_id(&mut self, namespace: u16) -> NodeId {
        let counter = self.next_numeric.entry(namespace).or_insert(1);
        loop {
            let candidate = NodeId::numeric(namespace, *counter);
            *counter = counter.wrapping_add(1).max(1);
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn namespace_array(&self) -> Variant {
        Variant::from(self.namespaces.clone())
    }
}

/// The address space: owns every node and reference.
#[derive(Debug)]
pub struct AddressSpace {
    inner: RwLock<Store>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new("urn:opc-ua-engine:server")
    }
}

impl AddressSpace {
    /// Creates an address space holding the standard namespace-0 skeleton:
    /// Root, the Objects/Types/Views folders, the standard reference, data,
    /// object and variable types, and the Server object.
    ///
    /// `server_uri` becomes namespace 1.
    pub fn new(server_uri: &str) -> Self {
        let mut store = Store {
            namespaces: vec![OPC_UA_NAMESPACE.to_string(), server_uri.to_string()],
            ..Store::default()
        };
        bootstrap(&mut store);
        Self {
            inner: RwLock::new(store),
        }
    }

    pub(crate) fn read_store(&self) -> RwLockReadGuard<'_, Store> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_store(&self) -> RwLockWriteGuard<'_, Store> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a node under `parent`, linked by `reference_type`.
    pub fn add_node(
        &self,
        parent: &NodeId,
        reference_type: &NodeId,
        new: NewNode,
    ) -> UaResult<NodeId> {
        let span = tracing::info_span!(
            "ua.add_node",
            parent = %parent,
            browse_name = %new.browse_name
        );
        let _enter = span.enter();

        let mut store = self.write_store();

        if new.node_class != new.attributes.node_class() {
            return Err(UaError::AttributeNotSupported {
                node_id: new.node_id.clone().unwrap_or_default(),
                attribute: AttributeId::NodeClass,
                node_class: new.node_class,
            });
        }
        if !store.nodes.contains_key(parent) {
            return Err(UaError::ParentNotFound(parent.clone()));
        }
        check_reference_type(&store, reference_type)?;
        if usize::from(new.browse_name.namespace) >= store.namespaces.len() {
            return Err(UaError::InvalidArgument(format!(
                "namespace {} of browse name '{}' is not registered",
                new.browse_name.namespace, new.browse_name
            )));
        }
        if let Some(type_definition) = &new.type_definition {
            store.entry(type_definition)?;
        }

        let node_id = match new.node_id {
            Some(id) if store.nodes.contains_key(&id) => return Err(UaError::DuplicateId(id)),
            Some(id) => id,
            None => store.generate_id(new.browse_name.namespace),
        };

        if let NodeAttributes::Variable(v) = &new.attributes {
            if !value_matches(&v.value, &v.data_type, v.value_rank) {
                return Err(UaError::TypeMismatch {
                    node_id,
                    expected: describe_data_type(&v.data_type, v.value_rank),
                    actual: v.value.type_tag(),
                });
            }
        }

        let display_name = new
            .display_name
            .unwrap_or_else(|| LocalizedText::new(new.browse_name.name.clone()));
        store.insert(Node {
            node_id: node_id.clone(),
            browse_name: new.browse_name,
            display_name,
            description: new.description,
            write_mask: 0,
            attributes: new.attributes,
        });
        store.link(parent, reference_type, &node_id);
        if let Some(type_definition) = &new.type_definition {
            store.link(&node_id, &ns0(reference_ids::HAS_TYPE_DEFINITION), type_definition);
        }

        tracing::debug!(node = %node_id, "node added");
        Ok(node_id)
    }

    /// Snapshot of a node.
    pub fn get_node(&self, id: &NodeId) -> UaResult<Node> {
        Ok(self.read_store().entry(id)?.node.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.read_store().nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.read_store().nodes.len()
    }

    /// Lazy, restartable view of a node's hierarchical children.
    pub fn children(&self, id: &NodeId) -> UaResult<Children<'_>> {
        self.read_store().entry(id)?;
        Ok(Children {
            space: self,
            parent: id.clone(),
        })
    }

    /// Collects [`Self::children`] into a vector.
    pub fn get_children(&self, id: &NodeId) -> UaResult<Vec<NodeId>> {
        Ok(self.children(id)?.iter().collect())
    }

    /// Removes a node and every reference where it is source or target.
    pub fn delete_node(&self, id: &NodeId) -> UaResult<Node> {
        let span = tracing::info_span!("ua.delete_node", node = %id);
        let _enter = span.enter();

        let mut store = self.write_store();
        let entry = store
            .nodes
            .remove(id)
            .ok_or_else(|| UaError::NotFound(id.clone()))?;

        let outgoing = store.forward.remove(id).unwrap_or_default();
        for edge in &outgoing {
            if let Some(edges) = store.inverse.get_mut(&edge.other) {
                edges.retain(|e| e.other != *id);
            }
        }
        let incoming = store.inverse.remove(id).unwrap_or_default();
        for edge in &incoming {
            if let Some(edges) = store.forward.get_mut(&edge.other) {
                edges.retain(|e| e.other != *id);
            }
        }

        tracing::debug!(
            outgoing = outgoing.len(),
            incoming = incoming.len(),
            "node deleted"
        );
        Ok(entry.node)
    }

    /// Adds a reference between two existing nodes.
    pub fn add_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        target: &NodeId,
    ) -> UaResult<()> {
        let mut store = self.write_store();
        store.entry(source)?;
        store.entry(target)?;
        check_reference_type(&store, reference_type)?;

        if store.has_edge(source, reference_type, target) {
            return Err(UaError::InvalidArgument(format!(
                "{reference_type} reference from {source} to {target} already exists"
            )));
        }
        if store.is_hierarchical_type(reference_type)
            && (source == target || store.reaches(target, source))
        {
            return Err(UaError::CyclicReference {
                from: source.clone(),
                to: target.clone(),
                reference_type: reference_type.clone(),
            });
        }

        store.link(source, reference_type, target);
        tracing::debug!(source = %source, target = %target, reference_type = %reference_type, "reference added");
        Ok(())
    }

    /// Removes a reference; returns `false` if it did not exist.
    pub fn delete_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        target: &NodeId,
    ) -> UaResult<bool> {
        let mut store = self.write_store();
        store.entry(source)?;
        Ok(store.unlink(source, reference_type, target))
    }

    /// References of a node in insertion order.
    pub fn references(&self, id: &NodeId, direction: BrowseDirection) -> UaResult<Vec<Reference>> {
        let store = self.read_store();
        store.entry(id)?;
        let mut out = Vec::new();
        if matches!(direction, BrowseDirection::Forward | BrowseDirection::Both) {
            if let Some(edges) = store.forward.get(id) {
                out.extend(edges.iter().map(|e| Reference {
                    source: id.clone(),
                    target: e.other.clone(),
                    reference_type: e.reference_type.clone(),
                    is_forward: true,
                }));
            }
        }
        if matches!(direction, BrowseDirection::Inverse | BrowseDirection::Both) {
            if let Some(edges) = store.inverse.get(id) {
                out.extend(edges.iter().map(|e| Reference {
                    source: e.other.clone(),
                    target: id.clone(),
                    reference_type: e.reference_type.clone(),
                    is_forward: false,
                }));
            }
        }
        Ok(out)
    }

    /// Resolves a relative path of browse names such as
    /// `["2:DeviceSet", "4:CPX-E-CEC-C1-PN"]` starting at `start`.
    pub fn browse_path<S: AsRef<str>>(&self, start: &NodeId, path: &[S]) -> UaResult<NodeId> {
        let names = path
            .iter()
            .map(|p| p.as_ref().parse::<QualifiedName>())
            .collect::<UaResult<Vec<_>>>()?;

        let store = self.read_store();
        store.entry(start)?;
        let mut current = start.clone();
        for (depth, name) in names.iter().enumerate() {
            let next = store.forward.get(&current).and_then(|edges| {
                edges
                    .iter()
                    .filter(|e| store.is_hierarchical_type(&e.reference_type))
                    .find(|e| {
                        store
                            .nodes
                            .get(&e.other)
                            .is_some_and(|n| n.node.browse_name == *name)
                    })
                    .map(|e| e.other.clone())
            });
            current = next.ok_or_else(|| UaError::NoMatch {
                start: start.clone(),
                path: path[..=depth]
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join("/"),
            })?;
        }
        Ok(current)
    }

    /// Registers a namespace URI and returns its index. Idempotent.
    pub fn register_namespace(&self, uri: &str) -> UaResult<u16> {
        let mut store = self.write_store();
        if let Some(pos) = store.namespaces.iter().position(|ns| ns == uri) {
            return Ok(u16::try_from(pos)?);
        }
        let index = u16::try_from(store.namespaces.len())?;
        store.namespaces.push(uri.to_string());

        let array = store.namespace_array();
        let epoch = store.fresh_epoch();
        if let Ok(entry) = store.entry_mut(&ns0(object_ids::SERVER_NAMESPACE_ARRAY)) {
            if let NodeAttributes::Variable(v) = &mut entry.node.attributes {
                v.value = array;
                entry.value_epoch = epoch;
            }
        }
        tracing::info!(uri, index, "namespace registered");
        Ok(index)
    }

    pub fn namespace_index(&self, uri: &str) -> Option<u16> {
        let store = self.read_store();
        store
            .namespaces
            .iter()
            .position(|ns| ns == uri)
            .and_then(|pos| u16::try_from(pos).ok())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.read_store().namespaces.clone()
    }

    pub fn is_subtype_of(&self, type_id: &NodeId, super_type: &NodeId) -> bool {
        self.read_store().is_subtype_of(type_id, super_type)
    }

    /// `true` for HierarchicalReferences and its subtypes.
    pub fn is_hierarchical_reference(&self, reference_type: &NodeId) -> bool {
        self.read_store().is_hierarchical_type(reference_type)
    }

    /// `true` when `node` sits below `ancestor` in the hierarchy.
    pub fn is_descendant(&self, node: &NodeId, ancestor: &NodeId) -> bool {
        self.read_store().is_descendant(node, ancestor)
    }
}

fn check_reference_type(store: &Store, reference_type: &NodeId) -> UaResult<()> {
    match store.nodes.get(reference_type) {
        Some(entry) if entry.node.node_class() == NodeClass::ReferenceType => Ok(()),
        Some(_) => Err(UaError::InvalidArgument(format!(
            "{reference_type} is not a reference type"
        ))),
        None => Err(UaError::NotFound(reference_type.clone())),
    }
}

/// Restartable view over a node's children; see [`AddressSpace::children`].
#[derive(Debug, Clone)]
pub struct Children<'a> {
    space: &'a AddressSpace,
    parent: NodeId,
}

impl<'a> Children<'a> {
    /// Starts a fresh pass over the children.
    pub fn iter(&self) -> ChildIter<'a> {
        ChildIter {
            space: self.space,
            parent: self.parent.clone(),
            cursor: None,
        }
    }
}

impl<'a> IntoIterator for &Children<'a> {
    type Item = NodeId;
    type IntoIter = ChildIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over the children of a node.
///
/// Each step takes the read lock and resumes after the last edge seen, so
/// children deleted mid-iteration are skipped and the pass always ends.
#[derive(Debug)]
pub struct ChildIter<'a> {
    space: &'a AddressSpace,
    parent: NodeId,
    cursor: Option<u64>,
}

impl Iterator for ChildIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.space.read_store();
        let edges = store.forward.get(&self.parent)?;
        let edge = edges
            .iter()
            .filter(|e| self.cursor.is_none_or(|c| e.seq > c))
            .find(|e| store.is_hierarchical_type(&e.reference_type))?;
        self.cursor = Some(edge.seq);
        Some(edge.other.clone())
    }
}

fn bootstrap(store: &mut Store) {
    let organizes = ns0(reference_ids::ORGANIZES);
    let has_subtype = ns0(reference_ids::HAS_SUBTYPE);
    let has_component = ns0(reference_ids::HAS_COMPONENT);
    let has_property = ns0(reference_ids::HAS_PROPERTY);
    let has_type_definition = ns0(reference_ids::HAS_TYPE_DEFINITION);

    let add = |store: &mut Store, id: u32, name: &str, attributes: NodeAttributes| {
        store.insert(Node {
            node_id: ns0(id),
            browse_name: QualifiedName::new(0, name),
            display_name: LocalizedText::new(name),
            description: LocalizedText::default(),
            write_mask: 0,
            attributes,
        });
    };

    // Reference types first: hierarchy checks during linking rely on them.
    let reference_types: [(u32, &str, Option<u32>, bool, bool, Option<&str>); 14] = [
        (reference_ids::REFERENCES, "References", None, true, true, None),
        (
            reference_ids::HIERARCHICAL_REFERENCES,
            "HierarchicalReferences",
            Some(reference_ids::REFERENCES),
            true,
            false,
            None,
        ),
        (
            reference_ids::NON_HIERARCHICAL_REFERENCES,
            "NonHierarchicalReferences",
            Some(reference_ids::REFERENCES),
            true,
            false,
            None,
        ),
        (
            reference_ids::HAS_CHILD,
            "HasChild",
            Some(reference_ids::HIERARCHICAL_REFERENCES),
            true,
            false,
            None,
        ),
        (
            reference_ids::ORGANIZES,
            "Organizes",
            Some(reference_ids::HIERARCHICAL_REFERENCES),
            false,
            false,
            Some("OrganizedBy"),
        ),
        (
            reference_ids::HAS_EVENT_SOURCE,
            "HasEventSource",
            Some(reference_ids::HIERARCHICAL_REFERENCES),
            false,
            false,
            Some("EventSourceOf"),
        ),
        (
            reference_ids::HAS_MODELLING_RULE,
            "HasModellingRule",
            Some(reference_ids::NON_HIERARCHICAL_REFERENCES),
            false,
            false,
            Some("ModellingRuleOf"),
        ),
        (
            reference_ids::HAS_TYPE_DEFINITION,
            "HasTypeDefinition",
            Some(reference_ids::NON_HIERARCHICAL_REFERENCES),
            false,
            false,
            Some("TypeDefinitionOf"),
        ),
        (
            reference_ids::AGGREGATES,
            "Aggregates",
            Some(reference_ids::HAS_CHILD),
            true,
            false,
            None,
        ),
        (
            reference_ids::HAS_SUBTYPE,
            "HasSubtype",
            Some(reference_ids::HAS_CHILD),
            false,
            false,
            Some("SubtypeOf"),
        ),
        (
            reference_ids::HAS_PROPERTY,
            "HasProperty",
            Some(reference_ids::AGGREGATES),
            false,
            false,
            Some("PropertyOf"),
        ),
        (
            reference_ids::HAS_COMPONENT,
            "HasComponent",
            Some(reference_ids::AGGREGATES),
            false,
            false,
            Some("ComponentOf"),
        ),
        (
            reference_ids::HAS_NOTIFIER,
            "HasNotifier",
            Some(reference_ids::HAS_EVENT_SOURCE),
            false,
            false,
            Some("NotifierOf"),
        ),
        (
            reference_ids::HAS_ORDERED_COMPONENT,
            "HasOrderedComponent",
            Some(reference_ids::HAS_COMPONENT),
            false,
            false,
            Some("OrderedComponentOf"),
        ),
    ];
    for (id, name, _, is_abstract, symmetric, inverse) in reference_types {
        add(
            store,
            id,
            name,
            NodeAttributes::ReferenceType(ReferenceTypeAttributes {
                is_abstract,
                symmetric,
                inverse_name: inverse.map(LocalizedText::new),
            }),
        );
    }
    for (id, _, parent, ..) in reference_types {
        if let Some(parent) = parent {
            store.link(&ns0(parent), &has_subtype, &ns0(id));
        }
    }

    let folder = || NodeAttributes::Object(ObjectAttributes::default());
    let folders = [
        (object_ids::ROOT_FOLDER, "Root", None),
        (object_ids::OBJECTS_FOLDER, "Objects", Some(object_ids::ROOT_FOLDER)),
        (object_ids::TYPES_FOLDER, "Types", Some(object_ids::ROOT_FOLDER)),
        (object_ids::VIEWS_FOLDER, "Views", Some(object_ids::ROOT_FOLDER)),
        (object_ids::OBJECT_TYPES_FOLDER, "ObjectTypes", Some(object_ids::TYPES_FOLDER)),
        (object_ids::VARIABLE_TYPES_FOLDER, "VariableTypes", Some(object_ids::TYPES_FOLDER)),
        (object_ids::DATA_TYPES_FOLDER, "DataTypes", Some(object_ids::TYPES_FOLDER)),
        (object_ids::REFERENCE_TYPES_FOLDER, "ReferenceTypes", Some(object_ids::TYPES_FOLDER)),
    ];
    for (id, name, parent) in folders {
        add(store, id, name, folder());
        if let Some(parent) = parent {
            store.link(&ns0(parent), &organizes, &ns0(id));
        }
    }
    store.link(
        &ns0(object_ids::REFERENCE_TYPES_FOLDER),
        &organizes,
        &ns0(reference_ids::REFERENCES),
    );

    let data_types = [
        (data_type_ids::BASE_DATA_TYPE, "BaseDataType", None, true),
        (data_type_ids::BOOLEAN, "Boolean", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::NUMBER, "Number", Some(data_type_ids::BASE_DATA_TYPE), true),
        (data_type_ids::INTEGER, "Integer", Some(data_type_ids::NUMBER), true),
        (data_type_ids::UINTEGER, "UInteger", Some(data_type_ids::NUMBER), true),
        (data_type_ids::SBYTE, "SByte", Some(data_type_ids::INTEGER), false),
        (data_type_ids::INT16, "Int16", Some(data_type_ids::INTEGER), false),
        (data_type_ids::INT32, "Int32", Some(data_type_ids::INTEGER), false),
        (data_type_ids::INT64, "Int64", Some(data_type_ids::INTEGER), false),
        (data_type_ids::BYTE, "Byte", Some(data_type_ids::UINTEGER), false),
        (data_type_ids::UINT16, "UInt16", Some(data_type_ids::UINTEGER), false),
        (data_type_ids::UINT32, "UInt32", Some(data_type_ids::UINTEGER), false),
        (data_type_ids::UINT64, "UInt64", Some(data_type_ids::UINTEGER), false),
        (data_type_ids::FLOAT, "Float", Some(data_type_ids::NUMBER), false),
        (data_type_ids::DOUBLE, "Double", Some(data_type_ids::NUMBER), false),
        (data_type_ids::STRING, "String", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::DATE_TIME, "DateTime", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::BYTE_STRING, "ByteString", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::NODE_ID, "NodeId", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::QUALIFIED_NAME, "QualifiedName", Some(data_type_ids::BASE_DATA_TYPE), false),
        (data_type_ids::LOCALIZED_TEXT, "LocalizedText", Some(data_type_ids::BASE_DATA_TYPE), false),
    ];
    for (id, name, parent, is_abstract) in data_types {
        add(
            store,
            id,
            name,
            NodeAttributes::DataType(DataTypeAttributes { is_abstract }),
        );
        match parent {
            Some(parent) => store.link(&ns0(parent), &has_subtype, &ns0(id)),
            None => store.link(&ns0(object_ids::DATA_TYPES_FOLDER), &organizes, &ns0(id)),
        }
    }

    let object_types = [
        (type_ids::BASE_OBJECT_TYPE, "BaseObjectType", None, false),
        (type_ids::FOLDER_TYPE, "FolderType", Some(type_ids::BASE_OBJECT_TYPE), false),
        (type_ids::SERVER_TYPE, "ServerType", Some(type_ids::BASE_OBJECT_TYPE), false),
        (type_ids::BASE_EVENT_TYPE, "BaseEventType", Some(type_ids::BASE_OBJECT_TYPE), true),
        (type_ids::SYSTEM_EVENT_TYPE, "SystemEventType", Some(type_ids::BASE_EVENT_TYPE), true),
        (
            type_ids::BASE_MODEL_CHANGE_EVENT_TYPE,
            "BaseModelChangeEventType",
            Some(type_ids::BASE_EVENT_TYPE),
            true,
        ),
    ];
    for (id, name, parent, is_abstract) in object_types {
        add(
            store,
            id,
            name,
            NodeAttributes::ObjectType(ObjectTypeAttributes { is_abstract }),
        );
        match parent {
            Some(parent) => store.link(&ns0(parent), &has_subtype, &ns0(id)),
            None => store.link(&ns0(object_ids::OBJECT_TYPES_FOLDER), &organizes, &ns0(id)),
        }
    }

    let variable_type = |is_abstract| {
        NodeAttributes::VariableType(VariableTypeAttributes {
            value: Variant::Empty,
            data_type: ns0(data_type_ids::BASE_DATA_TYPE),
            value_rank: value_rank::ANY,
            is_abstract,
        })
    };
    add(store, type_ids::BASE_VARIABLE_TYPE, "BaseVariableType", variable_type(true));
    add(store, type_ids::BASE_DATA_VARIABLE_TYPE, "BaseDataVariableType", variable_type(false));
    add(store, type_ids::PROPERTY_TYPE, "PropertyType", variable_type(false));
    store.link(
        &ns0(object_ids::VARIABLE_TYPES_FOLDER),
        &organizes,
        &ns0(type_ids::BASE_VARIABLE_TYPE),
    );
    for id in [type_ids::BASE_DATA_VARIABLE_TYPE, type_ids::PROPERTY_TYPE] {
        store.link(&ns0(type_ids::BASE_VARIABLE_TYPE), &has_subtype, &ns0(id));
    }

    // Type definitions of the folders.
    for (id, ..) in folders {
        store.link(&ns0(id), &has_type_definition, &ns0(type_ids::FOLDER_TYPE));
    }

    add(
        store,
        object_ids::SERVER,
        "Server",
        NodeAttributes::Object(ObjectAttributes::default()),
    );
    store.link(&ns0(object_ids::OBJECTS_FOLDER), &organizes, &ns0(object_ids::SERVER));
    store.link(&ns0(object_ids::SERVER), &has_type_definition, &ns0(type_ids::SERVER_TYPE));

    let namespace_array = store.namespace_array();
    add(
        store,
        object_ids::SERVER_NAMESPACE_ARRAY,
        "NamespaceArray",
        NodeAttributes::Variable(VariableAttributes::new(namespace_array).read_only()),
    );
    store.link(&ns0(object_ids::SERVER), &has_property, &ns0(object_ids::SERVER_NAMESPACE_ARRAY));
    store.link(
        &ns0(object_ids::SERVER_NAMESPACE_ARRAY),
        &has_type_definition,
        &ns0(type_ids::PROPERTY_TYPE),
    );

    let now = chrono::Utc::now();
    add(
        store,
        object_ids::SERVER_SERVER_STATUS,
        "ServerStatus",
        NodeAttributes::Variable(VariableAttributes::new(Variant::Empty).read_only()),
    );
    add(
        store,
        object_ids::SERVER_SERVER_STATUS_START_TIME,
        "StartTime",
        NodeAttributes::Variable(VariableAttributes::new(now).read_only()),
    );
    add(
        store,
        object_ids::SERVER_SERVER_STATUS_CURRENT_TIME,
        "CurrentTime",
        NodeAttributes::Variable(VariableAttributes::new(now).read_only()),
    );
    store.link(&ns0(object_ids::SERVER), &has_component, &ns0(object_ids::SERVER_SERVER_STATUS));
    for id in [
        object_ids::SERVER_SERVER_STATUS_START_TIME,
        object_ids::SERVER_SERVER_STATUS_CURRENT_TIME,
    ] {
        store.link(&ns0(object_ids::SERVER_SERVER_STATUS), &has_component, &ns0(id));
        store.link(&ns0(id), &has_type_definition, &ns0(type_ids::BASE_DATA_VARIABLE_TYPE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MethodAttributes, NodeClass};

    fn objects() -> NodeId {
        ns0(object_ids::OBJECTS_FOLDER)
    }

    fn organizes() -> NodeId {
        ns0(reference_ids::ORGANIZES)
    }

    fn has_component() -> NodeId {
        ns0(reference_ids::HAS_COMPONENT)
    }

    #[test]
    fn test_bootstrap_skeleton() {
        let space = AddressSpace::default();
        let root_children = space.get_children(&ns0(object_ids::ROOT_FOLDER)).unwrap();
        assert_eq!(
            root_children,
            vec![
                objects(),
                ns0(object_ids::TYPES_FOLDER),
                ns0(object_ids::VIEWS_FOLDER)
            ]
        );
        assert!(space.contains(&ns0(object_ids::SERVER)));
        assert_eq!(
            space.namespaces(),
            vec![OPC_UA_NAMESPACE.to_string(), "urn:opc-ua-engine:server".to_string()]
        );
        assert!(space.is_subtype_of(
            &ns0(data_type_ids::INT32),
            &ns0(data_type_ids::NUMBER)
        ));
        assert!(!space.is_subtype_of(
            &ns0(data_type_ids::STRING),
            &ns0(data_type_ids::NUMBER)
        ));
    }

    #[test]
    fn test_add_then_get_returns_supplied_attributes() {
        let space = AddressSpace::default();
        let attrs = VariableAttributes::new(8i32);
        let id = space
            .add_node(
                &objects(),
                &has_component(),
                NewNode::variable(QualifiedName::new(1, "MyVariable"), attrs.clone())
                    .with_display_name("My Variable"),
            )
            .unwrap();

        let node = space.get_node(&id).unwrap();
        assert_eq!(node.node_id, id);
        assert_eq!(node.node_class(), NodeClass::Variable);
        assert_eq!(node.browse_name, QualifiedName::new(1, "MyVariable"));
        assert_eq!(node.display_name, LocalizedText::new("My Variable"));
        assert_eq!(node.as_variable(), Some(&attrs));
        assert_eq!(id.namespace, 1);
    }

    #[test]
    fn test_add_node_errors() {
        let space = AddressSpace::default();
        let id = NodeId::numeric(1, 99);
        space
            .add_node(
                &objects(),
                &organizes(),
                NewNode::object(QualifiedName::new(1, "A")).with_id(id.clone()),
            )
            .unwrap();

        let dup = space.add_node(
            &objects(),
            &organizes(),
            NewNode::object(QualifiedName::new(1, "B")).with_id(id.clone()),
        );
        assert!(matches!(dup, Err(UaError::DuplicateId(d)) if d == id));

        let missing_parent = NodeId::numeric(1, 12345);
        let orphan = space.add_node(
            &missing_parent,
            &organizes(),
            NewNode::object(QualifiedName::new(1, "C")),
        );
        assert!(matches!(orphan, Err(UaError::ParentNotFound(p)) if p == missing_parent));

        let bad_ns = space.add_node(&objects(), &organizes(), NewNode::object(QualifiedName::new(9, "D")));
        assert!(matches!(bad_ns, Err(UaError::InvalidArgument(_))));

        let mut mismatched = NewNode::object(QualifiedName::new(1, "E"));
        mismatched.node_class = NodeClass::Method;
        assert!(matches!(
            space.add_node(&objects(), &organizes(), mismatched),
            Err(UaError::AttributeNotSupported { .. })
        ));

        let bad_value = VariableAttributes::new(1i32).with_data_type(ns0(data_type_ids::STRING));
        assert!(matches!(
            space.add_node(
                &objects(),
                &has_component(),
                NewNode::variable(QualifiedName::new(1, "F"), bad_value)
            ),
            Err(UaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_generated_ids_skip_used_ones() {
        let space = AddressSpace::default();
        space
            .add_node(
                &objects(),
                &organizes(),
                NewNode::object(QualifiedName::new(1, "Fixed")).with_id(NodeId::numeric(1, 1)),
            )
            .unwrap();
        let generated = space
            .add_node(&objects(), &organizes(), NewNode::object(QualifiedName::new(1, "Auto")))
            .unwrap();
        assert_eq!(generated, NodeId::numeric(1, 2));
    }

    #[test]
    fn test_children_are_insertion_ordered_and_restartable() {
        let space = AddressSpace::default();
        let parent = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "P")))
            .unwrap();
        let names = ["b", "a", "c"];
        let ids: Vec<NodeId> = names
            .iter()
            .map(|n| {
                space
                    .add_node(&parent, &has_component(), NewNode::object(QualifiedName::new(1, *n)))
                    .unwrap()
            })
            .collect();

        let children = space.children(&parent).unwrap();
        let first: Vec<_> = children.iter().collect();
        let second: Vec<_> = (&children).into_iter().collect();
        assert_eq!(first, ids);
        assert_eq!(second, ids);
    }

    #[test]
    fn test_children_skip_non_hierarchical_and_type_definition() {
        let space = AddressSpace::default();
        let obj = space
            .add_node(&objects(), &organizes(), NewNode::object(QualifiedName::new(1, "O")))
            .unwrap();
        // HasTypeDefinition to BaseObjectType is present but not a child.
        assert!(space.get_children(&obj).unwrap().is_empty());
        let refs = space.references(&obj, BrowseDirection::Forward).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].reference_type, ns0(reference_ids::HAS_TYPE_DEFINITION));
    }

    #[test]
    fn test_child_deleted_mid_iteration_is_skipped() {
        let space = AddressSpace::default();
        let parent = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "P")))
            .unwrap();
        let a = space
            .add_node(&parent, &organizes(), NewNode::object(QualifiedName::new(1, "a")))
            .unwrap();
        let b = space
            .add_node(&parent, &organizes(), NewNode::object(QualifiedName::new(1, "b")))
            .unwrap();
        let c = space
            .add_node(&parent, &organizes(), NewNode::object(QualifiedName::new(1, "c")))
            .unwrap();

        let children = space.children(&parent).unwrap();
        let mut iter = children.iter();
        assert_eq!(iter.next(), Some(a));
        space.delete_node(&b).unwrap();
        assert_eq!(iter.next(), Some(c));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_delete_removes_from_every_parent() {
        let space = AddressSpace::default();
        let p1 = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "P1")))
            .unwrap();
        let p2 = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "P2")))
            .unwrap();
        let shared = space
            .add_node(&p1, &organizes(), NewNode::object(QualifiedName::new(1, "Shared")))
            .unwrap();
        space.add_reference(&p2, &organizes(), &shared).unwrap();
        assert_eq!(space.get_children(&p2).unwrap(), vec![shared.clone()]);

        space.delete_node(&shared).unwrap();
        assert!(space.get_children(&p1).unwrap().is_empty());
        assert!(space.get_children(&p2).unwrap().is_empty());
        assert!(matches!(space.get_node(&shared), Err(UaError::NotFound(_))));
        assert!(matches!(space.delete_node(&shared), Err(UaError::NotFound(_))));
        // The type definition's inverse list no longer mentions the node.
        let inverse = space
            .references(&ns0(type_ids::BASE_OBJECT_TYPE), BrowseDirection::Inverse)
            .unwrap();
        assert!(inverse.iter().all(|r| r.source != shared));
    }

    #[test]
    fn test_hierarchical_cycle_rejected() {
        let space = AddressSpace::default();
        let a = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "A")))
            .unwrap();
        let b = space
            .add_node(&a, &organizes(), NewNode::folder(QualifiedName::new(1, "B")))
            .unwrap();

        let err = space.add_reference(&b, &has_component(), &a).unwrap_err();
        assert!(matches!(err, UaError::CyclicReference { .. }));
        let err = space.add_reference(&a, &organizes(), &a).unwrap_err();
        assert!(matches!(err, UaError::CyclicReference { .. }));

        // Non-hierarchical back edges are fine.
        space
            .add_reference(&b, &ns0(reference_ids::HAS_MODELLING_RULE), &a)
            .unwrap();
        // So are duplicate parents through a different reference type.
        space.add_reference(&a, &has_component(), &b).unwrap();
        assert_eq!(space.get_children(&a).unwrap(), vec![b.clone(), b]);
    }

    #[test]
    fn test_duplicate_reference_rejected_and_delete_reference() {
        let space = AddressSpace::default();
        let a = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "A")))
            .unwrap();
        assert!(matches!(
            space.add_reference(&objects(), &organizes(), &a),
            Err(UaError::InvalidArgument(_))
        ));
        assert!(space.delete_reference(&objects(), &organizes(), &a).unwrap());
        assert!(!space.delete_reference(&objects(), &organizes(), &a).unwrap());
        assert!(!space.get_children(&objects()).unwrap().contains(&a));
    }

    #[test]
    fn test_browse_path() {
        let space = AddressSpace::default();
        let ns = space.register_namespace("http://test2").unwrap();
        assert_eq!(ns, 2);
        let device_set = space
            .add_node(&objects(), &organizes(), NewNode::object(QualifiedName::new(ns, "DeviceSet")))
            .unwrap();
        let var = space
            .add_node(
                &device_set,
                &has_component(),
                NewNode::variable(QualifiedName::new(ns, "MyVariable"), VariableAttributes::new(1u8)),
            )
            .unwrap();

        let root = ns0(object_ids::ROOT_FOLDER);
        assert_eq!(
            space
                .browse_path(&root, &["Objects", "2:DeviceSet", "2:MyVariable"])
                .unwrap(),
            var
        );
        assert_eq!(
            space
                .browse_path(&root, &["Objects", "Server", "ServerStatus", "CurrentTime"])
                .unwrap(),
            ns0(object_ids::SERVER_SERVER_STATUS_CURRENT_TIME)
        );
        let err = space
            .browse_path(&root, &["Objects", "DeviceSet"])
            .unwrap_err();
        assert!(matches!(err, UaError::NoMatch { path, .. } if path == "Objects/DeviceSet"));
        assert_eq!(space.browse_path::<&str>(&root, &[]).unwrap(), root);
    }

    #[test]
    fn test_register_namespace_updates_array() {
        let space = AddressSpace::default();
        assert_eq!(space.register_namespace("http://test3").unwrap(), 2);
        assert_eq!(space.register_namespace("http://test3").unwrap(), 2);
        assert_eq!(space.namespace_index("http://test3"), Some(2));
        assert_eq!(space.namespace_index("http://missing"), None);

        let node = space.get_node(&ns0(object_ids::SERVER_NAMESPACE_ARRAY)).unwrap();
        let value = &node.as_variable().unwrap().value;
        assert_eq!(
            value.as_string_array().unwrap(),
            vec![OPC_UA_NAMESPACE, "urn:opc-ua-engine:server", "http://test3"]
        );
    }

    #[test]
    fn test_is_descendant() {
        let space = AddressSpace::default();
        let a = space
            .add_node(&objects(), &organizes(), NewNode::folder(QualifiedName::new(1, "A")))
            .unwrap();
        let m = space
            .add_node(
                &a,
                &has_component(),
                NewNode::method(QualifiedName::new(1, "M"), MethodAttributes::new(vec![], vec![])),
            )
            .unwrap();
        assert!(space.is_descendant(&m, &objects()));
        assert!(space.is_descendant(&m, &a));
        assert!(!space.is_descendant(&a, &m));
    }
}
