use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::errors::Result;

/// Service name used when the options do not name one.
pub const DEFAULT_SERVICE_NAME: &str = "TwoPC";

/// Remote procedures every node exposes under its service name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Prepare,
    Commit,
    Rollback,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Prepare, Method::Commit, Method::Rollback];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Prepare => "Prepare",
            Method::Commit => "Commit",
            Method::Rollback => "Rollback",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of every Prepare/Commit/Rollback call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPcRequest {
    /// Term of the peer set the leader is running
    pub term: u64,
    /// Sequence index assigned to the batch by the leader
    pub index: u64,
    /// Opaque batch bytes, forwarded to the participant unchanged
    pub batch: Vec<u8>,
}

impl TwoPcRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
