//! Service requests over a channel, answered by a worker thread that owns
//! an [`Arc<UaServer>`](crate::server::UaServer).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{UaError, UaResult};
use crate::provider::BrowseEntry;
use crate::server::UaServer;
use crate::types::{AttributeId, NodeId, Variant};

pub enum ServiceRequest {
    Browse {
        node_id: NodeId,
        reply: oneshot::Sender<UaResult<Vec<BrowseEntry>>>,
    },
    Read {
        node_id: NodeId,
        attribute: AttributeId,
        reply: oneshot::Sender<UaResult<Variant>>,
    },
    Write {
        node_id: NodeId,
        attribute: AttributeId,
        value: Variant,
        reply: oneshot::Sender<UaResult<()>>,
    },
    Call {
        object_id: NodeId,
        method_id: NodeId,
        inputs: Vec<Variant>,
        reply: oneshot::Sender<UaResult<Vec<Variant>>>,
    },
    TranslatePath {
        start: NodeId,
        path: Vec<String>,
        reply: oneshot::Sender<UaResult<NodeId>>,
    },
}

/// Serves [`ServiceRequest`]s against a [`UaServer`] on a dedicated thread.
///
/// The thread exits once every sender is dropped.
pub struct ServiceWorker {
    pub sender: mpsc::Sender<ServiceRequest>,
    pub handle: Option<std::thread::JoinHandle<()>>,
}

impl ServiceWorker {
    pub fn start(server: Arc<UaServer>) -> UaResult<Self> {
        let (tx, mut rx) = mpsc::channel(32);

        let handle = std::thread::Builder::new()
            .name("ua-service-worker".into())
            .spawn(move || {
                while let Some(req) = rx.blocking_recv() {
                    Self::dispatch(&server, req);
                }
                tracing::debug!("service worker exiting");
            })
            .map_err(|e| UaError::Internal(format!("failed to spawn service worker: {e}")))?;

        tracing::debug!("service worker thread started");

        Ok(Self {
            sender: tx,
            handle: Some(handle),
        })
    }

    fn dispatch(server: &UaServer, req: ServiceRequest) {
        match req {
            ServiceRequest::Browse { node_id, reply } => {
                let span = tracing::info_span!("ua.browse", node = %node_id);
                let _enter = span.enter();
                let entries = server.browse(&node_id);
                if let Ok(e) = &entries {
                    tracing::debug!(count = e.len(), "browse completed");
                }
                let _ = reply.send(entries);
            }
            ServiceRequest::Read {
                node_id,
                attribute,
                reply,
            } => {
                let _ = reply.send(server.read(&node_id, attribute));
            }
            ServiceRequest::Write {
                node_id,
                attribute,
                value,
                reply,
            } => {
                let _ = reply.send(server.write(&node_id, attribute, value));
            }
            ServiceRequest::Call {
                object_id,
                method_id,
                inputs,
                reply,
            } => {
                let _ = reply.send(server.call(&object_id, &method_id, &inputs));
            }
            ServiceRequest::TranslatePath { start, path, reply } => {
                let span = tracing::info_span!("ua.translate_path", start = %start, depth = path.len());
                let _enter = span.enter();
                let _ = reply.send(server.translate_path(&start, &path));
            }
        }
    }

    pub async fn send_request<F, R>(&self, req_builder: F) -> UaResult<R>
    where
        F: FnOnce(oneshot::Sender<UaResult<R>>) -> ServiceRequest,
    {
        if self
            .handle
            .as_ref()
            .is_some_and(std::thread::JoinHandle::is_finished)
        {
            tracing::error!("service worker thread panicked or exited unexpectedly");
            return Err(UaError::Internal("service worker thread stopped".into()));
        }

        let (tx, rx) = oneshot::channel();
        let req = req_builder(tx);

        self.sender
            .send(req)
            .await
            .map_err(|_| UaError::Internal("service worker channel closed".into()))?;

        rx.await
            .map_err(|_| UaError::Internal("service worker shut down during request".into()))?
    }
}
