pub mod peer_set;
pub mod types;

pub use peer_set::PeerSet;
pub use types::{NodeId, Role, Server};
