use serde::{Deserialize, Serialize};

/// One RPC call as it travels between nodes. `service` selects the
/// logical service on a shared listener, `method` the handler within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    pub payload: Vec<u8>,
}

/// Handler output, or the structured error it failed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse(pub Result<Vec<u8>, RemoteError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// No handler bound for the service/method pair
    NotFound,
    Participant,
    ProtocolViolation,
    /// The remote runtime is shutting down
    Unavailable,
    Internal,
}

/// Error as carried in an RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn not_found(service: &str, method: &str) -> Self {
        Self {
            kind: RemoteErrorKind::NotFound,
            message: format!("no handler for {}.{}", service, method),
        }
    }
}
