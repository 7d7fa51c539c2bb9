use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::ids::data_type_ids;
use super::{NodeId, ns0};
use crate::error::{UaError, UaResult};

/// Name qualified by a namespace index, used for browse names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.namespace, self.name)
        }
    }
}

/// Parses the browse-path element form `"<ns>:<name>"`, or `"<name>"` for
/// namespace 0. A prefix that is not a number is kept as part of the name.
impl FromStr for QualifiedName {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(UaError::InvalidArgument("empty browse name".into()));
        }
        if let Some((ns, name)) = s.split_once(':') {
            if let Ok(namespace) = ns.parse::<u16>() {
                return Ok(Self::new(namespace, name));
            }
        }
        Ok(Self::new(0, s))
    }
}

impl From<&str> for QualifiedName {
    fn from(name: &str) -> Self {
        Self::new(0, name)
    }
}

/// Human readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: String::new(),
            text: text.into(),
        }
    }

    pub fn with_locale(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for LocalizedText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for LocalizedText {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Type tag of a [`Variant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Empty,
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    DateTime,
    ByteString,
    QualifiedName,
    LocalizedText,
    NodeId,
    Array,
}

impl VariantType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Boolean => "BOOLEAN",
            Self::SByte => "SBYTE",
            Self::Byte => "BYTE",
            Self::Int16 => "INT16",
            Self::UInt16 => "UINT16",
            Self::Int32 => "INT32",
            Self::UInt32 => "UINT32",
            Self::Int64 => "INT64",
            Self::UInt64 => "UINT64",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::DateTime => "DATE_TIME",
            Self::ByteString => "BYTE_STRING",
            Self::QualifiedName => "QUALIFIED_NAME",
            Self::LocalizedText => "LOCALIZED_TEXT",
            Self::NodeId => "NODE_ID",
            Self::Array => "ARRAY",
        }
    }

    /// The built-in DataType node matching this tag, if there is one.
    pub const fn data_type_id(self) -> Option<u32> {
        Some(match self {
            Self::Boolean => data_type_ids::BOOLEAN,
            Self::SByte => data_type_ids::SBYTE,
            Self::Byte => data_type_ids::BYTE,
            Self::Int16 => data_type_ids::INT16,
            Self::UInt16 => data_type_ids::UINT16,
            Self::Int32 => data_type_ids::INT32,
            Self::UInt32 => data_type_ids::UINT32,
            Self::Int64 => data_type_ids::INT64,
            Self::UInt64 => data_type_ids::UINT64,
            Self::Float => data_type_ids::FLOAT,
            Self::Double => data_type_ids::DOUBLE,
            Self::String => data_type_ids::STRING,
            Self::DateTime => data_type_ids::DATE_TIME,
            Self::ByteString => data_type_ids::BYTE_STRING,
            Self::QualifiedName => data_type_ids::QUALIFIED_NAME,
            Self::LocalizedText => data_type_ids::LOCALIZED_TEXT,
            Self::NodeId => data_type_ids::NODE_ID,
            Self::Empty | Self::Array => return None,
        })
    }

    pub const fn is_signed_integer(self) -> bool {
        matches!(self, Self::SByte | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned_integer(self) -> bool {
        matches!(self, Self::Byte | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_numeric(self) -> bool {
        self.is_signed_integer()
            || self.is_unsigned_integer()
            || matches!(self, Self::Float | Self::Double)
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Homogeneous one-dimensional array of scalar values.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element_type: VariantType,
    values: Vec<Variant>,
}

impl Array {
    /// Builds an array, checking that every element is a scalar of `element_type`.
    pub fn new(element_type: VariantType, values: Vec<Variant>) -> UaResult<Self> {
        if matches!(element_type, VariantType::Array | VariantType::Empty) {
            return Err(UaError::InvalidArgument(format!(
                "array element type cannot be {element_type}"
            )));
        }
        if let Some(pos) = values.iter().position(|v| v.type_tag() != element_type) {
            return Err(UaError::InvalidArgument(format!(
                "array element {pos} is {} but the array holds {element_type}",
                values[pos].type_tag()
            )));
        }
        Ok(Self {
            element_type,
            values,
        })
    }

    pub const fn element_type(&self) -> VariantType {
        self.element_type
    }

    pub fn values(&self) -> &[Variant] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Attribute value: a tagged union of the built-in types plus the null state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    ByteString(Vec<u8>),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    NodeId(NodeId),
    Array(Array),
}

impl Variant {
    pub const fn type_tag(&self) -> VariantType {
        match self {
            Self::Empty => VariantType::Empty,
            Self::Boolean(_) => VariantType::Boolean,
            Self::SByte(_) => VariantType::SByte,
            Self::Byte(_) => VariantType::Byte,
            Self::Int16(_) => VariantType::Int16,
            Self::UInt16(_) => VariantType::UInt16,
            Self::Int32(_) => VariantType::Int32,
            Self::UInt32(_) => VariantType::UInt32,
            Self::Int64(_) => VariantType::Int64,
            Self::UInt64(_) => VariantType::UInt64,
            Self::Float(_) => VariantType::Float,
            Self::Double(_) => VariantType::Double,
            Self::String(_) => VariantType::String,
            Self::DateTime(_) => VariantType::DateTime,
            Self::ByteString(_) => VariantType::ByteString,
            Self::QualifiedName(_) => VariantType::QualifiedName,
            Self::LocalizedText(_) => VariantType::LocalizedText,
            Self::NodeId(_) => VariantType::NodeId,
            Self::Array(_) => VariantType::Array,
        }
    }

    /// The scalar tag: the element type for arrays, the tag itself otherwise.
    pub const fn scalar_type(&self) -> VariantType {
        match self {
            Self::Array(array) => array.element_type(),
            other => other.type_tag(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// DataType id describing this value, `BaseDataType` for null values.
    pub fn data_type(&self) -> NodeId {
        ns0(self
            .scalar_type()
            .data_type_id()
            .unwrap_or(data_type_ids::BASE_DATA_TYPE))
    }

    /// Builds an array variant from scalars, all of which must share one tag.
    pub fn array(element_type: VariantType, values: Vec<Self>) -> UaResult<Self> {
        Array::new(element_type, values).map(Self::Array)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Widens any integer tag to `i64` when it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::SByte(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::UInt16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the elements of a string array.
    pub fn as_string_array(&self) -> Option<Vec<&str>> {
        match self {
            Self::Array(array) if array.element_type() == VariantType::String => {
                array.values().iter().map(Self::as_str).collect()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Self::ByteString(v) => write!(f, "ByteString[{}]", v.len()),
            Self::QualifiedName(v) => write!(f, "{v}"),
            Self::LocalizedText(v) => write!(f, "{v}"),
            Self::NodeId(v) => write!(f, "{v}"),
            Self::Array(array) => {
                f.write_str("[")?;
                for (i, value) in array.values().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }

            impl From<Vec<$ty>> for Variant {
                fn from(values: Vec<$ty>) -> Self {
                    Self::Array(Array {
                        element_type: VariantType::$variant,
                        values: values.into_iter().map(Self::$variant).collect(),
                    })
                }
            }
        )*
    };
}

variant_from! {
    bool => Boolean,
    i8 => SByte,
    u8 => Byte,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
    DateTime<Utc> => DateTime,
    QualifiedName => QualifiedName,
    LocalizedText => LocalizedText,
    NodeId => NodeId,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Vec<&str>> for Variant {
    fn from(values: Vec<&str>) -> Self {
        values
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into()
    }
}
