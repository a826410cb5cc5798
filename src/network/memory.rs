use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::messages::{RpcRequest, RpcResponse};
use super::mux::MuxService;
use super::transport::{Handler, Transport};
use crate::peers::NodeId;
use crate::util::errors::{Error, Result};

struct Endpoint {
    mux: MuxService,
    connected: bool,
}

/// In-process network joining several transports by `NodeId`.
///
/// Requests and responses are bincode-encoded on the way through so that
/// payloads cross the same serialization boundary as on a real wire, and
/// each call runs on its own task so a caller giving up does not cancel the
/// remote handler.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<RwLock<HashMap<NodeId, Endpoint>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a node and returns its transport.
    pub fn join(&self, id: NodeId) -> Arc<MemoryTransport> {
        let mux = MuxService::new();
        self.endpoints.write().insert(
            id,
            Endpoint {
                mux: mux.clone(),
                connected: true,
            },
        );
        Arc::new(MemoryTransport {
            id,
            network: self.clone(),
            mux,
        })
    }

    /// Cuts a node off; calls to or from it fail with a transport error.
    pub fn disconnect(&self, id: &NodeId) {
        if let Some(endpoint) = self.endpoints.write().get_mut(id) {
            endpoint.connected = false;
        }
    }

    pub fn reconnect(&self, id: &NodeId) {
        if let Some(endpoint) = self.endpoints.write().get_mut(id) {
            endpoint.connected = true;
        }
    }

    fn route(&self, from: &NodeId, to: &NodeId) -> Result<MuxService> {
        let endpoints = self.endpoints.read();
        match endpoints.get(from) {
            Some(endpoint) if endpoint.connected => {}
            _ => return Err(Error::Transport(format!("node {} is disconnected", from))),
        }
        match endpoints.get(to) {
            Some(endpoint) if endpoint.connected => Ok(endpoint.mux.clone()),
            _ => Err(Error::Transport(format!("could not connect to {}", to))),
        }
    }
}

/// Transport handle of one node on a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: NodeId,
    network: MemoryNetwork,
    mux: MuxService,
}

impl MemoryTransport {
    pub fn mux(&self) -> &MuxService {
        &self.mux
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    async fn send(
        &self,
        target: &NodeId,
        service: &str,
        method: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mux = self.network.route(&self.id, target)?;

        let encoded = bincode::serialize(&RpcRequest {
            service: service.to_string(),
            method: method.to_string(),
            payload,
        })?;
        let request: RpcRequest = bincode::deserialize(&encoded)?;

        let from = self.id;
        let call = tokio::spawn(async move {
            let response = mux.dispatch(from, request).await;
            bincode::serialize(&response)
        });

        let encoded = match tokio::time::timeout(timeout, call).await {
            Err(_) => return Err(Error::Timeout(timeout)),
            Ok(Err(e)) => return Err(Error::Transport(format!("call to {} aborted: {}", target, e))),
            Ok(Ok(encoded)) => encoded?,
        };

        let RpcResponse(result) = bincode::deserialize(&encoded)?;
        result.map_err(Error::from)
    }

    fn register_handler(&self, service: &str, method: &str, handler: Handler) -> Result<()> {
        self.mux.register(service, method, handler)
    }

    fn deregister_service(&self, service: &str) {
        self.mux.deregister_service(service);
    }
}
