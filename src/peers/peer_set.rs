use std::collections::HashSet;
use std::fs;
use std::path::Path;

use libp2p_identity::{Keypair, PublicKey};
use serde::{Deserialize, Serialize};

use super::types::{public_key_bytes, NodeId, Role, Server};
use crate::util::errors::{Error, Result};

/// Signed description of cluster membership for one term.
///
/// A peer set is built once and never edited afterwards; moving to a new
/// membership means building and signing a new one. The only mutation is
/// [`PeerSet::sign`], which replaces the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet {
    term: u64,
    leader: Server,
    servers: Vec<Server>,
    #[serde(with = "public_key_bytes")]
    public_key: PublicKey,
    #[serde(default)]
    signature: Vec<u8>,
}

/// Fields covered by the signature, in encoding order.
#[derive(Serialize)]
struct SignedFields<'a> {
    term: u64,
    leader: &'a Server,
    servers: &'a [Server],
}

impl PeerSet {
    /// Builds an unsigned peer set. `signer` is the key the signature will
    /// be checked against.
    pub fn new(term: u64, servers: Vec<Server>, signer: PublicKey) -> Result<Self> {
        let leader = check_servers(&servers)?.clone();
        Ok(Self {
            term,
            leader,
            servers,
            public_key: signer,
            signature: Vec::new(),
        })
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn leader(&self) -> &Server {
        &self.leader
    }

    /// All members, the leader included, in configured order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn followers(&self) -> impl Iterator<Item = &Server> {
        self.servers.iter().filter(move |s| s.id != self.leader.id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Server> {
        self.servers.iter().find(|s| &s.id == id)
    }

    pub fn is_leader(&self, id: &NodeId) -> bool {
        &self.leader.id == id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    fn signing_bytes(&self) -> Result<Vec<u8>> {
        let fields = SignedFields {
            term: self.term,
            leader: &self.leader,
            servers: &self.servers,
        };
        Ok(bincode::serialize(&fields)?)
    }

    /// Signs the canonical encoding of term, leader and servers, replacing
    /// any previous signature.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        let bytes = self.signing_bytes()?;
        self.signature = keypair
            .sign(&bytes)
            .map_err(|e| Error::Configuration(format!("failed to sign peer set: {}", e)))?;
        Ok(())
    }

    /// Checks the signature against the embedded signer key.
    pub fn verify(&self) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        match self.signing_bytes() {
            Ok(bytes) => self.public_key.verify(&bytes, &self.signature),
            Err(_) => false,
        }
    }

    /// Full acceptance check: well-formed membership and a valid signature.
    pub fn validate(&self) -> Result<()> {
        let leader = check_servers(&self.servers)?;
        if leader != &self.leader {
            return Err(Error::Configuration(
                "leader field does not match the leader server".to_string(),
            ));
        }
        if !self.is_signed() {
            return Err(Error::Configuration("peer set is not signed".to_string()));
        }
        if !self.verify() {
            return Err(Error::Configuration(
                "peer set signature does not verify".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads a peer set from its JSON file form. The result is not yet
    /// trusted; call [`PeerSet::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

/// Returns the single leader, rejecting empty sets, duplicate ids and any
/// leader count other than one.
fn check_servers(servers: &[Server]) -> Result<&Server> {
    if servers.is_empty() {
        return Err(Error::Configuration("peer set has no servers".to_string()));
    }

    let mut seen = HashSet::new();
    for server in servers {
        if !seen.insert(server.id) {
            return Err(Error::Configuration(format!(
                "server {} listed more than once",
                server.id
            )));
        }
    }

    let mut leaders = servers.iter().filter(|s| s.role == Role::Leader);
    match (leaders.next(), leaders.next()) {
        (Some(leader), None) => Ok(leader),
        (None, _) => Err(Error::Configuration("peer set has no leader".to_string())),
        (Some(_), Some(_)) => Err(Error::Configuration(
            "peer set has more than one leader".to_string(),
        )),
    }
}
