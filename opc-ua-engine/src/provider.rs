use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

use crate::dispatcher::{ServiceRequest, ServiceWorker};
use crate::error::UaResult;
use crate::node::NodeClass;
use crate::server::UaServer;
use crate::types::{AttributeId, LocalizedText, NodeId, QualifiedName, Variant};

/// One hierarchical child as returned by [`UaProvider::browse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseEntry {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub node_class: NodeClass,
    /// Type of the reference leading from the browsed node to this one.
    pub reference_type: NodeId,
}

/// Async service interface over an address space.
///
/// Host layers (a binary protocol transport, a CLI, tests) talk to the
/// engine through this trait rather than through [`UaServer`] directly.
#[cfg_attr(any(test, feature = "test-support"), automock)]
#[async_trait]
pub trait UaProvider: Send + Sync {
    /// Hierarchical forward children of `node_id`, in insertion order.
    ///
    /// # Errors
    /// Returns `Err` if the node does not exist.
    async fn browse(&self, node_id: &NodeId) -> Result<Vec<BrowseEntry>>;

    /// Read one attribute.
    ///
    /// # Errors
    /// Returns `Err` if the node is unknown, lacks the attribute, or the
    /// Value is not readable.
    async fn read(&self, node_id: &NodeId, attribute: AttributeId) -> Result<Variant>;

    /// Write one attribute.
    ///
    /// # Errors
    /// Returns `Err` on access, type or attribute violations.
    async fn write(&self, node_id: &NodeId, attribute: AttributeId, value: Variant) -> Result<()>;

    /// Call a method on an object.
    ///
    /// # Errors
    /// Returns `Err` if the method is unknown, not executable, the
    /// arguments do not match, or the method body fails.
    async fn call(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        inputs: Vec<Variant>,
    ) -> Result<Vec<Variant>>;

    /// Resolve `"<ns>:<name>"` path elements from `start`.
    ///
    /// # Errors
    /// Returns `Err` if `start` is unknown or an element has no match.
    async fn translate_path(&self, start: &NodeId, path: Vec<String>) -> Result<NodeId>;
}

/// [`UaProvider`] served by an in-process [`UaServer`] on a worker thread.
pub struct LocalProvider {
    pub worker: ServiceWorker,
    server: Arc<UaServer>,
}

impl LocalProvider {
    /// Starts a service worker for `server`.
    pub fn new(server: Arc<UaServer>) -> UaResult<Self> {
        tracing::info!("Initializing LocalProvider...");
        let worker = ServiceWorker::start(Arc::clone(&server))?;
        tracing::info!("LocalProvider initialized successfully");
        Ok(Self { worker, server })
    }

    pub fn server(&self) -> &Arc<UaServer> {
        &self.server
    }
}

#[async_trait]
impl UaProvider for LocalProvider {
    async fn browse(&self, node_id: &NodeId) -> Result<Vec<BrowseEntry>> {
        let node_id = node_id.clone();
        Ok(self
            .worker
            .send_request(|reply| ServiceRequest::Browse { node_id, reply })
            .await?)
    }

    async fn read(&self, node_id: &NodeId, attribute: AttributeId) -> Result<Variant> {
        let node_id = node_id.clone();
        Ok(self
            .worker
            .send_request(|reply| ServiceRequest::Read {
                node_id,
                attribute,
                reply,
            })
            .await?)
    }

    async fn write(&self, node_id: &NodeId, attribute: AttributeId, value: Variant) -> Result<()> {
        let node_id = node_id.clone();
        Ok(self
            .worker
            .send_request(|reply| ServiceRequest::Write {
                node_id,
                attribute,
                value,
                reply,
            })
            .await?)
    }

    async fn call(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        inputs: Vec<Variant>,
    ) -> Result<Vec<Variant>> {
        let object_id = object_id.clone();
        let method_id = method_id.clone();
        Ok(self
            .worker
            .send_request(|reply| ServiceRequest::Call {
                object_id,
                method_id,
                inputs,
                reply,
            })
            .await?)
    }

    async fn translate_path(&self, start: &NodeId, path: Vec<String>) -> Result<NodeId> {
        let start = start.clone();
        Ok(self
            .worker
            .send_request(|reply| ServiceRequest::TranslatePath { start, path, reply })
            .await?)
    }
}
