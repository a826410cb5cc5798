pub mod config;
pub mod network;
pub mod peers;
pub mod storage;
pub mod twopc;
pub mod util;

pub use config::{P2pConfig, TwoPcConfig, TwoPcOptions};
pub use peers::{NodeId, PeerSet, Role, Server};
pub use twopc::{Participant, Phase, TwoPcRuntime};
pub use util::{Error, ParticipantError, Result};
