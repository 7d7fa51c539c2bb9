//! Value types shared by the address space and the subscription engine.

mod attribute_id;
pub mod ids;
mod node_id;
mod variant;

pub use attribute_id::AttributeId;
pub use ids::ns0;
pub use node_id::{Identifier, NodeId};
pub use variant::{Array, LocalizedText, QualifiedName, Variant, VariantType};
