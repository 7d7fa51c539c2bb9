//! Typed attribute reads and writes on top of the [`AddressSpace`].

use crate::address_space::{AddressSpace, NodeEntry};
use crate::error::{AccessKind, UaError, UaResult};
use crate::node::{NodeAttributes, access_level, describe_data_type, value_matches, value_rank};
use crate::types::{AttributeId, LocalizedText, NodeId, Variant, VariantType};

impl AddressSpace {
    /// Reads one attribute of a node.
    pub fn read_attribute(&self, node_id: &NodeId, attribute: AttributeId) -> UaResult<Variant> {
        let span = tracing::info_span!("ua.read", node = %node_id, attribute = %attribute);
        let _enter = span.enter();
        self.read_value_with_epoch(node_id, attribute)
            .map(|(value, _)| value)
    }

    /// Reads an attribute together with the node's value epoch.
    ///
    /// The epoch is only meaningful for the Value attribute of a Variable;
    /// every other attribute reports `0`.
    pub fn read_value_with_epoch(
        &self,
        node_id: &NodeId,
        attribute: AttributeId,
    ) -> UaResult<(Variant, u64)> {
        let store = self.read_store();
        let entry = store.entry(node_id)?;
        let value = read_from_entry(entry, attribute)?;
        let epoch = match (&entry.node.attributes, attribute) {
            (NodeAttributes::Variable(_), AttributeId::Value) => entry.value_epoch,
            _ => 0,
        };
        Ok((value, epoch))
    }

    /// Writes one attribute of a node.
    pub fn write_attribute(
        &self,
        node_id: &NodeId,
        attribute: AttributeId,
        value: Variant,
    ) -> UaResult<()> {
        let span = tracing::info_span!("ua.write", node = %node_id, attribute = %attribute);
        let _enter = span.enter();

        let mut store = self.write_store();
        let epoch = store.fresh_epoch();
        let entry = store.entry_mut(node_id)?;
        write_to_entry(entry, attribute, value, epoch, true)?;
        tracing::trace!(epoch = entry.value_epoch, "attribute written");
        Ok(())
    }

    /// Value write that ignores the AccessLevel, used for server-maintained
    /// variables such as `ServerStatus/CurrentTime`.
    pub(crate) fn update_value(&self, node_id: &NodeId, value: Variant) -> UaResult<()> {
        let mut store = self.write_store();
        let epoch = store.fresh_epoch();
        let entry = store.entry_mut(node_id)?;
        write_to_entry(entry, AttributeId::Value, value, epoch, false)
    }
}

fn not_supported(entry: &NodeEntry, attribute: AttributeId) -> UaError {
    UaError::AttributeNotSupported {
        node_id: entry.node.node_id.clone(),
        attribute,
        node_class: entry.node.node_class(),
    }
}

fn read_from_entry(entry: &NodeEntry, attribute: AttributeId) -> UaResult<Variant> {
    use NodeAttributes as A;

    let node = &entry.node;
    let value = match (attribute, &node.attributes) {
        (AttributeId::NodeId, _) => Variant::from(node.node_id.clone()),
        (AttributeId::NodeClass, _) => Variant::Int32(node.node_class() as i32),
        (AttributeId::BrowseName, _) => Variant::from(node.browse_name.clone()),
        (AttributeId::DisplayName, _) => Variant::from(node.display_name.clone()),
        (AttributeId::Description, _) => Variant::from(node.description.clone()),
        (AttributeId::WriteMask | AttributeId::UserWriteMask, _) => Variant::UInt32(node.write_mask),

        (AttributeId::IsAbstract, A::ObjectType(t)) => Variant::Boolean(t.is_abstract),
        (AttributeId::IsAbstract, A::VariableType(t)) => Variant::Boolean(t.is_abstract),
        (AttributeId::IsAbstract, A::ReferenceType(t)) => Variant::Boolean(t.is_abstract),
        (AttributeId::IsAbstract, A::DataType(t)) => Variant::Boolean(t.is_abstract),
        (AttributeId::Symmetric, A::ReferenceType(t)) => Variant::Boolean(t.symmetric),
        (AttributeId::InverseName, A::ReferenceType(t)) => t
            .inverse_name
            .clone()
            .map_or(Variant::Empty, Variant::from),
        (AttributeId::ContainsNoLoops, A::View(v)) => Variant::Boolean(v.contains_no_loops),
        (AttributeId::EventNotifier, A::Object(o)) => Variant::Byte(o.event_notifier),
        (AttributeId::EventNotifier, A::View(v)) => Variant::Byte(v.event_notifier),

        (AttributeId::Value, A::Variable(v)) => {
            if v.access_level & access_level::CURRENT_READ == 0 {
                return Err(UaError::AccessDenied {
                    node_id: node.node_id.clone(),
                    attribute,
                    access: AccessKind::Read,
                });
            }
            v.value.clone()
        }
        (AttributeId::Value, A::VariableType(t)) => t.value.clone(),
        (AttributeId::DataType, A::Variable(v)) => Variant::from(v.data_type.clone()),
        (AttributeId::DataType, A::VariableType(t)) => Variant::from(t.data_type.clone()),
        (AttributeId::ValueRank, A::Variable(v)) => Variant::Int32(v.value_rank),
        (AttributeId::ValueRank, A::VariableType(t)) => Variant::Int32(t.value_rank),
        (AttributeId::ArrayDimensions, A::Variable(v)) => array_dimensions(v.value_rank),
        (AttributeId::ArrayDimensions, A::VariableType(t)) => array_dimensions(t.value_rank),
        (AttributeId::AccessLevel, A::Variable(v)) => Variant::Byte(v.access_level),
        (AttributeId::UserAccessLevel, A::Variable(v)) => Variant::Byte(v.user_access_level),
        (AttributeId::MinimumSamplingInterval, A::Variable(v)) => {
            Variant::Double(v.minimum_sampling_interval)
        }
        (AttributeId::Historizing, A::Variable(v)) => Variant::Boolean(v.historizing),
        (AttributeId::Executable, A::Method(m)) => Variant::Boolean(m.executable),
        (AttributeId::UserExecutable, A::Method(m)) => Variant::Boolean(m.user_executable),
        _ => return Err(not_supported(entry, attribute)),
    };
    Ok(value)
}

fn array_dimensions(rank: i32) -> Variant {
    if rank == value_rank::ONE_DIMENSION {
        Variant::from(vec![0u32])
    } else {
        Variant::Empty
    }
}

/// Takes the inner value of a scalar of the expected tag.
fn expect_tag<T>(
    node_id: &NodeId,
    value: Variant,
    expected: VariantType,
    extract: impl FnOnce(Variant) -> Option<T>,
) -> UaResult<T> {
    let actual = value.type_tag();
    extract(value).ok_or_else(|| UaError::TypeMismatch {
        node_id: node_id.clone(),
        expected: expected.to_string(),
        actual,
    })
}

/// `epoch` becomes the node's value epoch if the Value attribute is written.
fn write_to_entry(
    entry: &mut NodeEntry,
    attribute: AttributeId,
    value: Variant,
    epoch: u64,
    enforce_access: bool,
) -> UaResult<()> {
    use NodeAttributes as A;

    let node_id = entry.node.node_id.clone();
    let denied = || UaError::AccessDenied {
        node_id: node_id.clone(),
        attribute,
        access: AccessKind::Write,
    };
    let boolean = |v: Variant| match v {
        Variant::Boolean(b) => Some(b),
        _ => None,
    };
    let byte = |v: Variant| match v {
        Variant::Byte(b) => Some(b),
        _ => None,
    };

    match attribute {
        AttributeId::NodeId
        | AttributeId::NodeClass
        | AttributeId::DataType
        | AttributeId::ValueRank
        | AttributeId::ArrayDimensions
        | AttributeId::UserWriteMask
        | AttributeId::UserExecutable => {
            // Read-only where defined; absent attributes report as unsupported.
            read_from_entry(entry, attribute)?;
            return Err(denied());
        }
        AttributeId::BrowseName => {
            entry.node.browse_name = expect_tag(&node_id, value, VariantType::QualifiedName, |v| match v {
                Variant::QualifiedName(q) => Some(q),
                _ => None,
            })?;
        }
        AttributeId::DisplayName => {
            entry.node.display_name = localized(&node_id, value)?;
        }
        AttributeId::Description => {
            entry.node.description = localized(&node_id, value)?;
        }
        AttributeId::WriteMask => {
            entry.node.write_mask = expect_tag(&node_id, value, VariantType::UInt32, |v| match v {
                Variant::UInt32(m) => Some(m),
                _ => None,
            })?;
        }
        AttributeId::Value => return write_value(entry, value, epoch, enforce_access),
        _ => {
            let node_class = entry.node.node_class();
            match (attribute, &mut entry.node.attributes) {
                (AttributeId::IsAbstract, A::ObjectType(t)) => {
                    t.is_abstract = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::IsAbstract, A::VariableType(t)) => {
                    t.is_abstract = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::IsAbstract, A::ReferenceType(t)) => {
                    t.is_abstract = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::IsAbstract, A::DataType(t)) => {
                    t.is_abstract = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::Symmetric, A::ReferenceType(t)) => {
                    t.symmetric = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::InverseName, A::ReferenceType(t)) => {
                    t.inverse_name = match value {
                        Variant::Empty => None,
                        other => Some(localized(&node_id, other)?),
                    };
                }
                (AttributeId::ContainsNoLoops, A::View(v)) => {
                    v.contains_no_loops = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::EventNotifier, A::Object(o)) => {
                    o.event_notifier = expect_tag(&node_id, value, VariantType::Byte, byte)?;
                }
                (AttributeId::EventNotifier, A::View(v)) => {
                    v.event_notifier = expect_tag(&node_id, value, VariantType::Byte, byte)?;
                }
                (AttributeId::AccessLevel, A::Variable(v)) => {
                    v.access_level = expect_tag(&node_id, value, VariantType::Byte, byte)?;
                }
                (AttributeId::UserAccessLevel, A::Variable(v)) => {
                    v.user_access_level = expect_tag(&node_id, value, VariantType::Byte, byte)?;
                }
                (AttributeId::MinimumSamplingInterval, A::Variable(v)) => {
                    v.minimum_sampling_interval =
                        expect_tag(&node_id, value, VariantType::Double, |v| v.as_f64())?;
                }
                (AttributeId::Historizing, A::Variable(v)) => {
                    v.historizing = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                }
                (AttributeId::Executable, A::Method(m)) => {
                    let executable = expect_tag(&node_id, value, VariantType::Boolean, boolean)?;
                    m.executable = executable;
                    m.user_executable = executable;
                }
                _ => {
                    return Err(UaError::AttributeNotSupported {
                        node_id,
                        attribute,
                        node_class,
                    });
                }
            }
        }
    }
    Ok(())
}

fn localized(node_id: &NodeId, value: Variant) -> UaResult<LocalizedText> {
    expect_tag(node_id, value, VariantType::LocalizedText, |v| match v {
        Variant::LocalizedText(t) => Some(t),
        Variant::String(s) => Some(LocalizedText::new(s)),
        _ => None,
    })
}

fn write_value(
    entry: &mut NodeEntry,
    value: Variant,
    epoch: u64,
    enforce_access: bool,
) -> UaResult<()> {
    let node_id = entry.node.node_id.clone();
    let node_class = entry.node.node_class();
    match &mut entry.node.attributes {
        NodeAttributes::Variable(v) => {
            if enforce_access && v.access_level & access_level::CURRENT_WRITE == 0 {
                return Err(UaError::AccessDenied {
                    node_id,
                    attribute: AttributeId::Value,
                    access: AccessKind::Write,
                });
            }
            if !value_matches(&value, &v.data_type, v.value_rank) {
                return Err(UaError::TypeMismatch {
                    expected: describe_data_type(&v.data_type, v.value_rank),
                    actual: value.type_tag(),
                    node_id,
                });
            }
            v.value = value;
            entry.value_epoch = epoch;
            Ok(())
        }
        NodeAttributes::VariableType(t) => {
            if !value_matches(&value, &t.data_type, t.value_rank) {
                return Err(UaError::TypeMismatch {
                    expected: describe_data_type(&t.data_type, t.value_rank),
                    actual: value.type_tag(),
                    node_id,
                });
            }
            t.value = value;
            Ok(())
        }
        _ => Err(UaError::AttributeNotSupported {
            node_class,
            node_id,
            attribute: AttributeId::Value,
        }),
    }
}
