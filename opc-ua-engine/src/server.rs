//! Server facade composing the address space, method registry and
//! subscription engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::address_space::{AddressSpace, BrowseDirection};
use crate::config::EngineConfig;
use crate::engine::SubscriptionEngine;
use crate::error::{AccessKind, UaError, UaResult};
use crate::method::MethodRegistry;
use crate::node::{
    Argument, MethodAttributes, NewNode, Node, NodeClass, VariableAttributes, event_notifier,
};
use crate::provider::BrowseEntry;
use crate::subscription::Event;
use crate::types::ids::{object_ids, reference_ids};
use crate::types::{AttributeId, NodeId, QualifiedName, Variant, ns0};

/// An in-process OPC UA server core.
#[derive(Debug)]
pub struct UaServer {
    config: EngineConfig,
    space: Arc<AddressSpace>,
    methods: Arc<MethodRegistry>,
    subscriptions: SubscriptionEngine,
}

impl Default for UaServer {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl UaServer {
    pub fn new(config: EngineConfig) -> Self {
        let space = Arc::new(AddressSpace::new(&config.server_uri));
        let subscriptions = SubscriptionEngine::new(Arc::clone(&space), config.clone());
        tracing::info!(server_uri = %config.server_uri, nodes = space.node_count(), "address space ready");
        Self {
            config,
            space,
            methods: Arc::new(MethodRegistry::new()),
            subscriptions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn address_space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn methods(&self) -> &Arc<MethodRegistry> {
        &self.methods
    }

    pub fn subscriptions(&self) -> &SubscriptionEngine {
        &self.subscriptions
    }

    pub fn root_node(&self) -> NodeId {
        ns0(object_ids::ROOT_FOLDER)
    }

    pub fn objects_node(&self) -> NodeId {
        ns0(object_ids::OBJECTS_FOLDER)
    }

    pub fn server_node(&self) -> NodeId {
        ns0(object_ids::SERVER)
    }

    pub fn register_namespace(&self, uri: &str) -> UaResult<u16> {
        self.space.register_namespace(uri)
    }

    pub fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.space.namespace_index(uri)
    }

    pub fn add_node(&self, parent: &NodeId, reference_type: &NodeId, new: NewNode) -> UaResult<NodeId> {
        self.space.add_node(parent, reference_type, new)
    }

    /// Adds a folder organized under `parent`.
    pub fn add_folder(&self, parent: &NodeId, name: QualifiedName) -> UaResult<NodeId> {
        self.space
            .add_node(parent, &ns0(reference_ids::ORGANIZES), NewNode::folder(name))
    }

    /// Adds an object as a component of `parent`, optionally with a fixed id.
    pub fn add_object(
        &self,
        parent: &NodeId,
        node_id: Option<NodeId>,
        name: QualifiedName,
    ) -> UaResult<NodeId> {
        let mut new = NewNode::object(name);
        new.node_id = node_id;
        self.space
            .add_node(parent, &ns0(reference_ids::HAS_COMPONENT), new)
    }

    /// Adds a read/write variable whose DataType follows `value`.
    pub fn add_variable(
        &self,
        parent: &NodeId,
        name: QualifiedName,
        value: impl Into<Variant>,
    ) -> UaResult<NodeId> {
        self.space.add_node(
            parent,
            &ns0(reference_ids::HAS_COMPONENT),
            NewNode::variable(name, VariableAttributes::new(value)),
        )
    }

    pub fn add_property(
        &self,
        parent: &NodeId,
        name: QualifiedName,
        value: impl Into<Variant>,
    ) -> UaResult<NodeId> {
        self.space.add_node(
            parent,
            &ns0(reference_ids::HAS_PROPERTY),
            NewNode::property(name, VariableAttributes::new(value)),
        )
    }

    /// Adds a method node under `parent` and binds `callback` to it.
    pub fn add_method<F>(
        &self,
        parent: &NodeId,
        name: QualifiedName,
        inputs: Vec<Argument>,
        outputs: Vec<Argument>,
        callback: F,
    ) -> UaResult<NodeId>
    where
        F: Fn(&NodeId, &[Variant]) -> anyhow::Result<Vec<Variant>> + Send + Sync + 'static,
    {
        let method_id = self.space.add_node(
            parent,
            &ns0(reference_ids::HAS_COMPONENT),
            NewNode::method(name, MethodAttributes::new(inputs.clone(), outputs.clone())),
        )?;
        if let Err(e) = self
            .methods
            .register(method_id.clone(), inputs, outputs, callback)
        {
            // Keep node and binding in step.
            self.space.delete_node(&method_id)?;
            return Err(e);
        }
        Ok(method_id)
    }

    /// Deletes a node; a method node also loses its binding.
    pub fn delete_node(&self, node_id: &NodeId) -> UaResult<Node> {
        let node = self.space.delete_node(node_id)?;
        if node.node_class() == NodeClass::Method {
            self.methods.unregister(node_id);
        }
        Ok(node)
    }

    pub fn read(&self, node_id: &NodeId, attribute: AttributeId) -> UaResult<Variant> {
        self.space.read_attribute(node_id, attribute)
    }

    pub fn write(&self, node_id: &NodeId, attribute: AttributeId, value: Variant) -> UaResult<()> {
        self.space.write_attribute(node_id, attribute, value)
    }

    /// Calls `method_id` on `object_id`.
    ///
    /// The method must be an executable component of the object.
    pub fn call(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        inputs: &[Variant],
    ) -> UaResult<Vec<Variant>> {
        let span = tracing::info_span!("ua.call", object = %object_id, method = %method_id);
        let _enter = span.enter();

        self.space.get_node(object_id)?;
        let method = self.space.get_node(method_id)?;
        let Some(attributes) = method.as_method() else {
            return Err(UaError::MethodNotFound(method_id.clone()));
        };
        if !attributes.executable || !attributes.user_executable {
            return Err(UaError::AccessDenied {
                node_id: method_id.clone(),
                attribute: AttributeId::Executable,
                access: AccessKind::Execute,
            });
        }
        let is_component = self
            .space
            .references(object_id, BrowseDirection::Forward)?
            .iter()
            .any(|r| r.target == *method_id && r.reference_type == ns0(reference_ids::HAS_COMPONENT));
        if !is_component {
            return Err(UaError::MethodNotFound(method_id.clone()));
        }

        let outputs = self.methods.invoke(method_id, object_id, inputs)?;
        tracing::debug!(outputs = outputs.len(), "method call completed");
        Ok(outputs)
    }

    /// Hierarchical children of a node with their browse information.
    pub fn browse(&self, node_id: &NodeId) -> UaResult<Vec<BrowseEntry>> {
        let references = self.space.references(node_id, BrowseDirection::Forward)?;
        let mut entries = Vec::with_capacity(references.len());
        for reference in references {
            if !self.space.is_hierarchical_reference(&reference.reference_type) {
                continue;
            }
            // A concurrent delete may have removed the target already.
            let Ok(node) = self.space.get_node(&reference.target) else {
                continue;
            };
            entries.push(BrowseEntry {
                node_id: node.node_id.clone(),
                browse_name: node.browse_name.clone(),
                display_name: node.display_name.clone(),
                node_class: node.node_class(),
                reference_type: reference.reference_type,
            });
        }
        Ok(entries)
    }

    pub fn translate_path<S: AsRef<str>>(&self, start: &NodeId, path: &[S]) -> UaResult<NodeId> {
        self.space.browse_path(start, path)
    }

    /// Sets or clears the SubscribeToEvents bit of an Object or View.
    pub fn set_event_notifier(&self, node_id: &NodeId, enabled: bool) -> UaResult<()> {
        let node = self.space.get_node(node_id)?;
        let current = node
            .event_notifier()
            .ok_or_else(|| UaError::AttributeNotSupported {
                node_id: node_id.clone(),
                attribute: AttributeId::EventNotifier,
                node_class: node.node_class(),
            })?;
        let bits = if enabled {
            current | event_notifier::SUBSCRIBE_TO_EVENTS
        } else {
            current & !event_notifier::SUBSCRIBE_TO_EVENTS
        };
        self.space
            .write_attribute(node_id, AttributeId::EventNotifier, Variant::Byte(bits))
    }

    /// Lets clients subscribe to events on the Server object.
    pub fn enable_event_notification(&self) -> UaResult<()> {
        self.set_event_notifier(&self.server_node(), true)
    }

    pub fn trigger_event(&self, event: Event) -> UaResult<usize> {
        self.subscriptions.trigger_event(event)
    }

    /// Writes the current time into `ServerStatus/CurrentTime`.
    pub fn refresh_server_status(&self) -> UaResult<()> {
        self.space.update_value(
            &ns0(object_ids::SERVER_SERVER_STATUS_CURRENT_TIME),
            Variant::from(Utc::now()),
        )
    }

    /// Refreshes `ServerStatus/CurrentTime` every `period` on the current
    /// runtime until the returned handle is aborted.
    pub fn spawn_clock(&self, period: Duration) -> UaResult<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UaError::Internal(format!("no tokio runtime for server clock: {e}")))?;
        let space = Arc::clone(&self.space);
        let current_time = ns0(object_ids::SERVER_SERVER_STATUS_CURRENT_TIME);
        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = space.update_value(&current_time, Variant::from(Utc::now())) {
                    tracing::warn!(error = %e, "server clock stopped");
                    break;
                }
            }
        }))
    }

    /// Deletes every subscription.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        tracing::info!("server shut down");
    }
}
