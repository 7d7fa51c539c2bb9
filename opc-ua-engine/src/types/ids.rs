//! Well-known namespace-0 node ids used by the bootstrap address space.

use super::NodeId;

/// Standard objects and variables.
pub mod object_ids {
    pub const ROOT_FOLDER: u32 = 84;
    pub const OBJECTS_FOLDER: u32 = 85;
    pub const TYPES_FOLDER: u32 = 86;
    pub const VIEWS_FOLDER: u32 = 87;
    pub const OBJECT_TYPES_FOLDER: u32 = 88;
    pub const VARIABLE_TYPES_FOLDER: u32 = 89;
    pub const DATA_TYPES_FOLDER: u32 = 90;
    pub const REFERENCE_TYPES_FOLDER: u32 = 91;
    pub const SERVER: u32 = 2253;
    pub const SERVER_NAMESPACE_ARRAY: u32 = 2255;
    pub const SERVER_SERVER_STATUS: u32 = 2256;
    pub const SERVER_SERVER_STATUS_START_TIME: u32 = 2257;
    pub const SERVER_SERVER_STATUS_CURRENT_TIME: u32 = 2258;
}

/// Standard object, variable and event types.
pub mod type_ids {
    pub const BASE_OBJECT_TYPE: u32 = 58;
    pub const FOLDER_TYPE: u32 = 61;
    pub const BASE_VARIABLE_TYPE: u32 = 62;
    pub const BASE_DATA_VARIABLE_TYPE: u32 = 63;
    pub const PROPERTY_TYPE: u32 = 68;
    pub const SERVER_TYPE: u32 = 2004;
    pub const BASE_EVENT_TYPE: u32 = 2041;
    pub const SYSTEM_EVENT_TYPE: u32 = 2130;
    pub const BASE_MODEL_CHANGE_EVENT_TYPE: u32 = 2132;
}

/// Standard reference types.
pub mod reference_ids {
    pub const REFERENCES: u32 = 31;
    pub const NON_HIERARCHICAL_REFERENCES: u32 = 32;
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    pub const HAS_CHILD: u32 = 34;
    pub const ORGANIZES: u32 = 35;
    pub const HAS_EVENT_SOURCE: u32 = 36;
    pub const HAS_MODELLING_RULE: u32 = 37;
    pub const HAS_TYPE_DEFINITION: u32 = 40;
    pub const AGGREGATES: u32 = 44;
    pub const HAS_SUBTYPE: u32 = 45;
    pub const HAS_PROPERTY: u32 = 46;
    pub const HAS_COMPONENT: u32 = 47;
    pub const HAS_NOTIFIER: u32 = 48;
    pub const HAS_ORDERED_COMPONENT: u32 = 49;

    /// Every hierarchical reference type defined in namespace 0.
    pub const HIERARCHICAL: [u32; 10] = [
        HIERARCHICAL_REFERENCES,
        HAS_CHILD,
        ORGANIZES,
        HAS_EVENT_SOURCE,
        AGGREGATES,
        HAS_SUBTYPE,
        HAS_PROPERTY,
        HAS_COMPONENT,
        HAS_NOTIFIER,
        HAS_ORDERED_COMPONENT,
    ];
}

/// Built-in data types.
pub mod data_type_ids {
    pub const BOOLEAN: u32 = 1;
    pub const SBYTE: u32 = 2;
    pub const BYTE: u32 = 3;
    pub const INT16: u32 = 4;
    pub const UINT16: u32 = 5;
    pub const INT32: u32 = 6;
    pub const UINT32: u32 = 7;
    pub const INT64: u32 = 8;
    pub const UINT64: u32 = 9;
    pub const FLOAT: u32 = 10;
    pub const DOUBLE: u32 = 11;
    pub const STRING: u32 = 12;
    pub const DATE_TIME: u32 = 13;
    pub const BYTE_STRING: u32 = 15;
    pub const NODE_ID: u32 = 17;
    pub const QUALIFIED_NAME: u32 = 20;
    pub const LOCALIZED_TEXT: u32 = 21;
    pub const BASE_DATA_TYPE: u32 = 24;
    pub const NUMBER: u32 = 26;
    pub const INTEGER: u32 = 27;
    pub const UINTEGER: u32 = 28;
}

/// Shorthand for a namespace-0 numeric id.
pub const fn ns0(id: u32) -> NodeId {
    NodeId::numeric(0, id)
}

/// Returns `true` when `reference_type` is one of the standard hierarchical types.
pub fn is_hierarchical(reference_type: &NodeId) -> bool {
    reference_type.namespace == 0
        && reference_type
            .as_u32()
            .is_some_and(|id| reference_ids::HIERARCHICAL.contains(&id))
}
