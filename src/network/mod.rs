pub mod codec;
pub mod memory;
pub mod messages;
pub mod mux;
pub mod p2p;
pub mod peer_registry;
pub mod transport;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use messages::{RemoteError, RemoteErrorKind, RpcRequest, RpcResponse};
pub use mux::MuxService;
pub use p2p::P2pTransport;
pub use peer_registry::{AddressBook, ClientBuilder};
pub use transport::{Handler, HandlerFuture, Transport};
