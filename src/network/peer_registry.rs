use std::collections::HashMap;

use libp2p::Multiaddr;
use parking_lot::RwLock;

use crate::peers::NodeId;

/// Resolves a node to the address a connection to it should be dialed on.
///
/// The transport asks the builder whenever it has no live connection to a
/// target; returning `None` fails the call with a transport error.
pub trait ClientBuilder: Send + Sync {
    fn resolve(&self, node: &NodeId) -> Option<Multiaddr>;
}

/// Static NodeId to Multiaddr mapping
#[derive(Default)]
pub struct AddressBook {
    addresses: RwLock<HashMap<NodeId, Multiaddr>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the address of a node
    pub fn register(&self, node: NodeId, addr: Multiaddr) {
        tracing::debug!("Address for {} set to {}", node, addr);
        self.addresses.write().insert(node, addr);
    }
}

impl ClientBuilder for AddressBook {
    fn resolve(&self, node: &NodeId) -> Option<Multiaddr> {
        self.addresses.read().get(node).cloned()
    }
}
