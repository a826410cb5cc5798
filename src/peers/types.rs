use std::fmt;

use libp2p_identity::{PeerId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::util::errors::{Error, Result};

/// Identity of a cluster member, a multihash digest of its public key.
///
/// Only equality and hashing are meaningful; the textual form is for logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(PeerId);

impl NodeId {
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(PeerId::from_public_key(key))
    }

    /// Identity backed by random bytes rather than a real key. Tests only
    /// need distinct ids.
    pub fn random() -> Self {
        Self(PeerId::random())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        PeerId::from_bytes(bytes)
            .map(Self)
            .map_err(|e| Error::Serialization(format!("invalid node id: {}", e)))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub(crate) fn peer_id(&self) -> PeerId {
        self.0
    }
}

impl From<PeerId> for NodeId {
    fn from(peer_id: PeerId) -> Self {
        Self(peer_id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Role of a server within one peer set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => write!(f, "Leader"),
            Role::Follower => write!(f, "Follower"),
        }
    }
}

/// One cluster member and the key that verifies anything it signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub role: Role,
    pub id: NodeId,
    #[serde(with = "public_key_bytes")]
    pub public_key: PublicKey,
}

impl Server {
    pub fn new(role: Role, id: NodeId, public_key: PublicKey) -> Self {
        Self {
            role,
            id,
            public_key,
        }
    }

    /// Server whose id is derived from its own key.
    pub fn from_public_key(role: Role, public_key: PublicKey) -> Self {
        Self {
            role,
            id: NodeId::from_public_key(&public_key),
            public_key,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// Serde adapter storing a public key in its protobuf encoding.
pub(crate) mod public_key_bytes {
    use libp2p_identity::PublicKey;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&key.encode_protobuf())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        PublicKey::try_decode_protobuf(&bytes).map_err(D::Error::custom)
    }
}
