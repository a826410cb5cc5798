use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::peers::NodeId;
use crate::util::errors::Result;

/// Future returned by an RPC handler.
pub type HandlerFuture = BoxFuture<'static, Result<Vec<u8>>>;

/// Local function bound to a `(service, method)` pair. It receives the
/// authenticated sender and the raw request payload.
pub type Handler = Arc<dyn Fn(NodeId, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Node-addressed RPC surface consumed by the runtime.
///
/// Implementations resolve `NodeId`s to connections themselves; callers
/// never deal with network addresses. Several logical services may share a
/// transport, so handlers are always bound under a service name.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this transport authenticates as.
    fn local_id(&self) -> NodeId;

    /// Calls `service.method` on `target`.
    ///
    /// Fails with `Error::Transport` when the target cannot be reached,
    /// `Error::Timeout` when no response arrives within `timeout`, and with
    /// the error the remote handler returned otherwise.
    async fn send(
        &self,
        target: &NodeId,
        service: &str,
        method: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>>;

    /// Binds `handler` to `service.method`. Binding a pair twice is an error.
    fn register_handler(&self, service: &str, method: &str, handler: Handler) -> Result<()>;

    /// Unbinds every method of `service`.
    fn deregister_service(&self, service: &str);
}
