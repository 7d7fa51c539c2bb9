use std::fmt;

use thiserror::Error;

use crate::node::NodeClass;
use crate::subscription::{MonitoredItemId, SubscriptionId};
use crate::types::{AttributeId, NodeId, VariantType};

/// Result type alias for engine operations.
pub type UaResult<T> = Result<T, UaError>;

/// Kind of access that was refused by [`UaError::AccessDenied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Execute => "Execute",
        })
    }
}

/// Centralized error enum for the address space and subscription engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UaError {
    /// Node absent from the address space.
    #[error("Node {0} not found")]
    NotFound(NodeId),

    #[error("Parent node {0} not found")]
    ParentNotFound(NodeId),

    #[error("Node {0} already exists")]
    DuplicateId(NodeId),

    /// A callable is already bound to this method node.
    #[error("Method {0} is already registered")]
    DuplicateRegistration(NodeId),

    /// Value tag incompatible with the attribute's DataType or ValueRank.
    #[error("Type mismatch on {node_id}: {actual} is not accepted by {expected}")]
    TypeMismatch {
        node_id: NodeId,
        expected: String,
        actual: VariantType,
    },

    #[error("Argument {index}: {actual} is not accepted by {expected}")]
    ArgumentTypeMismatch {
        index: usize,
        expected: String,
        actual: VariantType,
    },

    #[error("Expected {expected} arguments, got {actual}")]
    ArgumentCountMismatch { expected: usize, actual: usize },

    #[error("{access} access to {attribute} of {node_id} denied")]
    AccessDenied {
        node_id: NodeId,
        attribute: AttributeId,
        access: AccessKind,
    },

    /// The node class does not define the requested attribute.
    #[error("{node_class} node {node_id} has no {attribute} attribute")]
    AttributeNotSupported {
        node_id: NodeId,
        attribute: AttributeId,
        node_class: NodeClass,
    },

    #[error("No method registered for {0}")]
    MethodNotFound(NodeId),

    /// Failure raised by bound method logic, with the original cause.
    #[error("Method {method} failed: {source}")]
    MethodExecutionFailed {
        method: NodeId,
        #[source]
        source: anyhow::Error,
    },

    /// Monitored node was deleted. Delivered to subscribers as data.
    #[error("Node {0} was deleted")]
    NodeGone(NodeId),

    #[error("Subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Monitored item {0} not found")]
    MonitoredItemNotFound(MonitoredItemId),

    #[error("{reference_type} reference from {from} to {to} would close a hierarchical cycle")]
    CyclicReference {
        from: NodeId,
        to: NodeId,
        reference_type: NodeId,
    },

    /// No node matched a browse path element.
    #[error("Browse path '{path}' from {start} has no match")]
    NoMatch { start: NodeId, path: String },

    /// Event subscription on a node whose EventNotifier does not allow it.
    #[error("Node {0} does not notify events")]
    EventNotifierDisabled(NodeId),

    #[error("Too many subscriptions (limit {0})")]
    TooManySubscriptions(usize),

    #[error("Too many monitored items (limit {0})")]
    TooManyMonitoredItems(usize),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Catch-all for unexpected internal failures.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UaError {
    /// The OPC UA status code a service layer would report for this error.
    pub const fn status_code(&self) -> u32 {
        match self {
            Self::NotFound(_) | Self::NodeGone(_) => 0x8034_0000,
            Self::ParentNotFound(_) => 0x805B_0000,
            Self::DuplicateId(_) => 0x805E_0000,
            Self::DuplicateRegistration(_) => 0x80AF_0000,
            Self::TypeMismatch { .. } | Self::ArgumentTypeMismatch { .. } => 0x8074_0000,
            Self::ArgumentCountMismatch { expected, actual } => {
                if *actual < *expected {
                    0x8076_0000
                } else {
                    0x80E5_0000
                }
            }
            Self::AccessDenied { access, .. } => match access {
                AccessKind::Read => 0x803A_0000,
                AccessKind::Write => 0x803B_0000,
                AccessKind::Execute => 0x8111_0000,
            },
            Self::AttributeNotSupported { .. } => 0x8035_0000,
            Self::MethodNotFound(_) => 0x8075_0000,
            Self::MethodExecutionFailed { .. } => 0x8001_0000,
            Self::SubscriptionNotFound(_) => 0x8028_0000,
            Self::MonitoredItemNotFound(_) => 0x8042_0000,
            Self::CyclicReference { .. } => 0x805C_0000,
            Self::NoMatch { .. } => 0x806F_0000,
            Self::EventNotifierDisabled(_) => 0x803D_0000,
            Self::TooManySubscriptions(_) => 0x8077_0000,
            Self::TooManyMonitoredItems(_) => 0x80DB_0000,
            Self::InvalidArgument(_) => 0x80AB_0000,
            Self::Internal(_) => 0x8002_0000,
        }
    }

    /// Symbolic name of [`Self::status_code`].
    pub fn status_name(&self) -> &'static str {
        status_name(self.status_code()).unwrap_or("Bad")
    }
}

impl From<tokio::task::JoinError> for UaError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Async task join failed: {err}"))
    }
}

impl From<std::num::TryFromIntError> for UaError {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::InvalidArgument(format!("Integer conversion error: {err}"))
    }
}

/// Maps the status codes this engine produces to their symbolic names.
pub fn status_name(code: u32) -> Option<&'static str> {
    match code {
        0 => Some("Good"),
        0x8001_0000 => Some("BadUnexpectedError"),
        0x8002_0000 => Some("BadInternalError"),
        0x8028_0000 => Some("BadSubscriptionIdInvalid"),
        0x8034_0000 => Some("BadNodeIdUnknown"),
        0x8035_0000 => Some("BadAttributeIdInvalid"),
        0x803A_0000 => Some("BadNotReadable"),
        0x803B_0000 => Some("BadNotWritable"),
        0x803D_0000 => Some("BadNotSupported"),
        0x8042_0000 => Some("BadMonitoredItemIdInvalid"),
        0x8074_0000 => Some("BadTypeMismatch"),
        0x8075_0000 => Some("BadMethodInvalid"),
        0x8076_0000 => Some("BadArgumentsMissing"),
        0x8077_0000 => Some("BadTooManySubscriptions"),
        0x805B_0000 => Some("BadParentNodeIdInvalid"),
        0x805C_0000 => Some("BadReferenceNotAllowed"),
        0x805E_0000 => Some("BadNodeIdExists"),
        0x806F_0000 => Some("BadNoMatch"),
        0x80AB_0000 => Some("BadInvalidArgument"),
        0x80AF_0000 => Some("BadInvalidState"),
        0x80DB_0000 => Some("BadTooManyMonitoredItems"),
        0x80E5_0000 => Some("BadTooManyArguments"),
        0x8111_0000 => Some("BadNotExecutable"),
        _ => None,
    }
}

/// Formats a status code as hex plus its symbolic name when known.
pub fn format_status(code: u32) -> String {
    let hex = format!("0x{code:08X}");
    match status_name(code) {
        Some(name) => format!("{hex} ({name})"),
        None => hex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_for_spec_taxonomy() {
        let id = NodeId::numeric(2, 1);
        assert_eq!(UaError::NotFound(id.clone()).status_name(), "BadNodeIdUnknown");
        assert_eq!(UaError::NodeGone(id.clone()).status_name(), "BadNodeIdUnknown");
        assert_eq!(
            UaError::ArgumentCountMismatch {
                expected: 1,
                actual: 0
            }
            .status_name(),
            "BadArgumentsMissing"
        );
        assert_eq!(
            UaError::ArgumentCountMismatch {
                expected: 1,
                actual: 3
            }
            .status_name(),
            "BadTooManyArguments"
        );
        assert_eq!(
            UaError::AccessDenied {
                node_id: id,
                attribute: AttributeId::NodeClass,
                access: AccessKind::Write,
            }
            .status_name(),
            "BadNotWritable"
        );
    }

    #[test]
    fn test_method_failure_keeps_cause() {
        let err = UaError::MethodExecutionFailed {
            method: NodeId::numeric(2, 7),
            source: anyhow::anyhow!("valve stuck"),
        };
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "valve stuck");
        assert!(err.to_string().contains("valve stuck"));
    }

    #[test]
    fn test_format_status() {
        assert_eq!(format_status(0x8034_0000), "0x80340000 (BadNodeIdUnknown)");
        assert_eq!(format_status(0x1234_0000), "0x12340000");
    }
}
