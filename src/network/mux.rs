use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::messages::{RemoteError, RpcRequest, RpcResponse};
use super::transport::Handler;
use crate::peers::NodeId;
use crate::util::errors::{Error, Result};

/// Registry of handlers keyed by service and method, shared by every
/// service that listens on the same transport.
#[derive(Clone, Default)]
pub struct MuxService {
    handlers: Arc<RwLock<HashMap<String, HashMap<String, Handler>>>>,
}

impl MuxService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: &str, method: &str, handler: Handler) -> Result<()> {
        let mut handlers = self.handlers.write();
        let methods = handlers.entry(service.to_string()).or_default();
        if methods.contains_key(method) {
            return Err(Error::Configuration(format!(
                "handler {}.{} is already registered",
                service, method
            )));
        }
        methods.insert(method.to_string(), handler);
        tracing::debug!("Registered handler {}.{}", service, method);
        Ok(())
    }

    /// Removes all methods of `service`, returning how many were bound.
    pub fn deregister_service(&self, service: &str) -> usize {
        let removed = self
            .handlers
            .write()
            .remove(service)
            .map(|methods| methods.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!("Deregistered service {} ({} methods)", service, removed);
        }
        removed
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.handlers.read().contains_key(service)
    }

    fn lookup(&self, service: &str, method: &str) -> Option<Handler> {
        self.handlers
            .read()
            .get(service)
            .and_then(|methods| methods.get(method))
            .cloned()
    }

    /// Runs the handler bound to the request's service and method.
    pub async fn dispatch(&self, from: NodeId, request: RpcRequest) -> RpcResponse {
        let handler = match self.lookup(&request.service, &request.method) {
            Some(handler) => handler,
            None => {
                tracing::debug!(
                    "No handler for {}.{} (from {})",
                    request.service,
                    request.method,
                    from
                );
                return RpcResponse(Err(RemoteError::not_found(
                    &request.service,
                    &request.method,
                )));
            }
        };

        RpcResponse(handler(from, request.payload).await.map_err(|e| e.to_remote()))
    }
}
