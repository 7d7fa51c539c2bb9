//! Node model: one [`Node`] type carrying a class tag and a class-specific
//! attribute payload.

use std::fmt;

use crate::types::ids::{data_type_ids, type_ids};
use crate::types::{LocalizedText, NodeId, QualifiedName, Variant, VariantType, ns0};

/// OPC UA node classes (numeric values preserved).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    Object = 1,
    Variable = 2,
    Method = 4,
    ObjectType = 8,
    VariableType = 16,
    ReferenceType = 32,
    DataType = 64,
    View = 128,
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bits of the `AccessLevel` attribute.
pub mod access_level {
    pub const CURRENT_READ: u8 = 0x01;
    pub const CURRENT_WRITE: u8 = 0x02;
    pub const HISTORY_READ: u8 = 0x04;
}

/// Bits of the `EventNotifier` attribute.
pub mod event_notifier {
    pub const SUBSCRIBE_TO_EVENTS: u8 = 0x01;
}

/// Well-known `ValueRank` values.
pub mod value_rank {
    pub const SCALAR_OR_ONE_DIMENSION: i32 = -3;
    pub const ANY: i32 = -2;
    pub const SCALAR: i32 = -1;
    pub const ONE_OR_MORE_DIMENSIONS: i32 = 0;
    pub const ONE_DIMENSION: i32 = 1;
}

/// One entry of a method's input or output signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub description: LocalizedText,
}

impl Argument {
    /// A scalar argument of the given built-in data type.
    pub fn new(name: impl Into<String>, data_type: u32) -> Self {
        Self {
            name: name.into(),
            data_type: ns0(data_type),
            value_rank: value_rank::SCALAR,
            description: LocalizedText::default(),
        }
    }

    pub fn with_value_rank(mut self, value_rank: i32) -> Self {
        self.value_rank = value_rank;
        self
    }

    pub fn with_description(mut self, description: impl Into<LocalizedText>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectAttributes {
    pub event_notifier: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAttributes {
    pub value: Variant,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub access_level: u8,
    pub user_access_level: u8,
    /// Fastest rate the value can be sampled at, in milliseconds.
    pub minimum_sampling_interval: f64,
    pub historizing: bool,
}

impl VariableAttributes {
    /// Readable and writable variable whose DataType and ValueRank are
    /// inferred from `value`. A null value declares `BaseDataType`.
    pub fn new(value: impl Into<Variant>) -> Self {
        let value = value.into();
        let value_rank = if value.is_array() {
            value_rank::ONE_DIMENSION
        } else if value.is_empty() {
            value_rank::ANY
        } else {
            value_rank::SCALAR
        };
        Self {
            data_type: value.data_type(),
            value,
            value_rank,
            access_level: access_level::CURRENT_READ | access_level::CURRENT_WRITE,
            user_access_level: access_level::CURRENT_READ | access_level::CURRENT_WRITE,
            minimum_sampling_interval: 0.0,
            historizing: false,
        }
    }

    pub fn with_data_type(mut self, data_type: NodeId) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_value_rank(mut self, value_rank: i32) -> Self {
        self.value_rank = value_rank;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_level = access_level::CURRENT_READ;
        self.user_access_level = access_level::CURRENT_READ;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodAttributes {
    pub executable: bool,
    pub user_executable: bool,
    pub input_arguments: Vec<Argument>,
    pub output_arguments: Vec<Argument>,
}

impl MethodAttributes {
    pub fn new(input_arguments: Vec<Argument>, output_arguments: Vec<Argument>) -> Self {
        Self {
            executable: true,
            user_executable: true,
            input_arguments,
            output_arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectTypeAttributes {
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableTypeAttributes {
    pub value: Variant,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceTypeAttributes {
    pub is_abstract: bool,
    pub symmetric: bool,
    pub inverse_name: Option<LocalizedText>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataTypeAttributes {
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewAttributes {
    pub contains_no_loops: bool,
    pub event_notifier: u8,
}

/// Class-specific attribute payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAttributes {
    Object(ObjectAttributes),
    Variable(VariableAttributes),
    Method(MethodAttributes),
    ObjectType(ObjectTypeAttributes),
    VariableType(VariableTypeAttributes),
    ReferenceType(ReferenceTypeAttributes),
    DataType(DataTypeAttributes),
    View(ViewAttributes),
}

impl NodeAttributes {
    pub const fn node_class(&self) -> NodeClass {
        match self {
            Self::Object(_) => NodeClass::Object,
            Self::Variable(_) => NodeClass::Variable,
            Self::Method(_) => NodeClass::Method,
            Self::ObjectType(_) => NodeClass::ObjectType,
            Self::VariableType(_) => NodeClass::VariableType,
            Self::ReferenceType(_) => NodeClass::ReferenceType,
            Self::DataType(_) => NodeClass::DataType,
            Self::View(_) => NodeClass::View,
        }
    }
}

/// A node of the address space.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub write_mask: u32,
    pub attributes: NodeAttributes,
}

impl Node {
    pub const fn node_class(&self) -> NodeClass {
        self.attributes.node_class()
    }

    pub const fn as_variable(&self) -> Option<&VariableAttributes> {
        match &self.attributes {
            NodeAttributes::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_method(&self) -> Option<&MethodAttributes> {
        match &self.attributes {
            NodeAttributes::Method(m) => Some(m),
            _ => None,
        }
    }

    /// The node's `EventNotifier`, for classes that define one.
    pub const fn event_notifier(&self) -> Option<u8> {
        match &self.attributes {
            NodeAttributes::Object(o) => Some(o.event_notifier),
            NodeAttributes::View(v) => Some(v.event_notifier),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}, {})", self.node_id, self.browse_name)
    }
}

/// Description of a node to add with [`crate::AddressSpace::add_node`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Requested id; generated in the browse name's namespace when `None`.
    pub node_id: Option<NodeId>,
    pub node_class: NodeClass,
    pub browse_name: QualifiedName,
    /// Defaults to the browse name's text.
    pub display_name: Option<LocalizedText>,
    pub description: LocalizedText,
    pub type_definition: Option<NodeId>,
    pub attributes: NodeAttributes,
}

impl NewNode {
    pub fn new(browse_name: QualifiedName, attributes: NodeAttributes) -> Self {
        Self {
            node_id: None,
            node_class: attributes.node_class(),
            browse_name,
            display_name: None,
            description: LocalizedText::default(),
            type_definition: None,
            attributes,
        }
    }

    pub fn object(browse_name: QualifiedName) -> Self {
        Self::new(browse_name, NodeAttributes::Object(ObjectAttributes::default()))
            .with_type_definition(ns0(type_ids::BASE_OBJECT_TYPE))
    }

    pub fn folder(browse_name: QualifiedName) -> Self {
        Self::new(browse_name, NodeAttributes::Object(ObjectAttributes::default()))
            .with_type_definition(ns0(type_ids::FOLDER_TYPE))
    }

    pub fn variable(browse_name: QualifiedName, attributes: VariableAttributes) -> Self {
        Self::new(browse_name, NodeAttributes::Variable(attributes))
            .with_type_definition(ns0(type_ids::BASE_DATA_VARIABLE_TYPE))
    }

    pub fn property(browse_name: QualifiedName, attributes: VariableAttributes) -> Self {
        Self::new(browse_name, NodeAttributes::Variable(attributes))
            .with_type_definition(ns0(type_ids::PROPERTY_TYPE))
    }

    pub fn method(browse_name: QualifiedName, attributes: MethodAttributes) -> Self {
        Self::new(browse_name, NodeAttributes::Method(attributes))
    }

    pub fn object_type(browse_name: QualifiedName, is_abstract: bool) -> Self {
        Self::new(
            browse_name,
            NodeAttributes::ObjectType(ObjectTypeAttributes { is_abstract }),
        )
    }

    pub fn with_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<LocalizedText>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<LocalizedText>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_type_definition(mut self, type_definition: NodeId) -> Self {
        self.type_definition = Some(type_definition);
        self
    }
}

/// Tags a DataType node admits for values, or `None` when every tag is accepted.
pub(crate) fn admitted_tags(data_type: &NodeId) -> Option<Vec<VariantType>> {
    use VariantType as T;
    if data_type.namespace != 0 {
        return None;
    }
    let tags = match data_type.as_u32()? {
        data_type_ids::BASE_DATA_TYPE => return None,
        data_type_ids::NUMBER => vec![
            T::SByte,
            T::Byte,
            T::Int16,
            T::UInt16,
            T::Int32,
            T::UInt32,
            T::Int64,
            T::UInt64,
            T::Float,
            T::Double,
        ],
        data_type_ids::INTEGER => vec![T::SByte, T::Int16, T::Int32, T::Int64],
        data_type_ids::UINTEGER => vec![T::Byte, T::UInt16, T::UInt32, T::UInt64],
        id => {
            let tag = [
                T::Boolean,
                T::SByte,
                T::Byte,
                T::Int16,
                T::UInt16,
                T::Int32,
                T::UInt32,
                T::Int64,
                T::UInt64,
                T::Float,
                T::Double,
                T::String,
                T::DateTime,
                T::ByteString,
                T::NodeId,
                T::QualifiedName,
                T::LocalizedText,
            ]
            .into_iter()
            .find(|t| t.data_type_id() == Some(id))?;
            vec![tag]
        }
    };
    Some(tags)
}

/// Describes what a DataType admits, for error messages.
pub(crate) fn describe_data_type(data_type: &NodeId, value_rank: i32) -> String {
    let base = match admitted_tags(data_type) {
        Some(tags) if tags.len() == 1 => tags[0].to_string(),
        _ => data_type.to_string(),
    };
    match value_rank {
        value_rank::SCALAR => base,
        value_rank::ANY => format!("{base} (any rank)"),
        value_rank::SCALAR_OR_ONE_DIMENSION => format!("{base} (scalar or array)"),
        rank => format!("{base}[rank {rank}]"),
    }
}

/// Checks a value against a declared DataType and ValueRank.
///
/// Null values are always accepted. Only one-dimensional arrays exist, so
/// a ValueRank above one admits nothing but null.
pub(crate) fn value_matches(value: &Variant, data_type: &NodeId, rank: i32) -> bool {
    if value.is_empty() {
        return true;
    }
    let rank_ok = match rank {
        value_rank::ANY => true,
        value_rank::SCALAR => !value.is_array(),
        value_rank::SCALAR_OR_ONE_DIMENSION => true,
        value_rank::ONE_OR_MORE_DIMENSIONS | value_rank::ONE_DIMENSION => value.is_array(),
        _ => false,
    };
    if !rank_ok {
        return false;
    }
    match admitted_tags(data_type) {
        None => true,
        Some(tags) => tags.contains(&value.scalar_type()),
    }
}
