//! # opc-ua-engine
//!
//! In-process OPC UA server core: a typed address space, attribute access
//! with OPC UA rules, method dispatch, and subscriptions that sample
//! monitored items and deliver data changes and events to handlers.
//!
//! No wire protocol is included. A transport drives the engine through
//! [`UaServer`] or the async [`UaProvider`] trait and receives
//! notifications through a [`SubscriptionHandler`].
//!
//! ## Features
//! - `test-support`: Enables `MockUaProvider` and `MockSubscriptionHandler` via `mockall`

mod address_space;
mod attributes;
mod config;
mod dispatcher;
mod engine;
mod error;
mod method;
mod monitored_item;
mod node;
mod provider;
mod server;
mod subscription;
pub mod types;

pub use address_space::{
    AddressSpace, BrowseDirection, ChildIter, Children, OPC_UA_NAMESPACE, Reference,
};
pub use config::EngineConfig;
pub use dispatcher::{ServiceRequest, ServiceWorker};
pub use engine::SubscriptionEngine;
pub use error::{AccessKind, UaError, UaResult, format_status, status_name};
pub use method::{MethodCallback, MethodRegistry};
pub use monitored_item::{DataChange, ItemStatus, MonitoredItemCreated, MonitoringParameters};
pub use node::{
    Argument, DataTypeAttributes, MethodAttributes, NewNode, Node, NodeAttributes, NodeClass,
    ObjectAttributes, ObjectTypeAttributes, ReferenceTypeAttributes, VariableAttributes,
    VariableTypeAttributes, ViewAttributes, access_level, event_notifier, value_rank,
};
pub use provider::{BrowseEntry, LocalProvider, UaProvider};
pub use server::UaServer;
pub use types::{AttributeId, LocalizedText, NodeId, QualifiedName, Variant, VariantType, ns0};
pub use subscription::{
    ChannelHandler, Event, EventFilter, EventNotification, MonitoredItemId, Notification,
    SubscriptionHandler, SubscriptionId, SubscriptionState, SubscriptionStats,
};

// Test support re-export
#[cfg(feature = "test-support")]
pub use provider::MockUaProvider;
#[cfg(feature = "test-support")]
pub use subscription::MockSubscriptionHandler;
