use std::sync::Arc;

use tokio::sync::Mutex;

use super::participant::Participant;
use super::rpc::{Method, TwoPcRequest};
use crate::network::transport::{Handler, HandlerFuture, Transport};
use crate::peers::{NodeId, PeerSet};
use crate::util::errors::{Error, Result};

/// Batch that was prepared here and still awaits its outcome
struct OpenBatch {
    index: u64,
    batch: Vec<u8>,
}

struct Gate {
    /// Highest index that reached an outcome on this node
    last_decided: u64,
    open: Option<OpenBatch>,
}

/// Participant side of the protocol, run by every node.
///
/// Requests are checked against the accepted peer set and the node's own
/// batch history before they reach the participant: only the leader of the
/// current term may call, a batch is prepared at most once, and commit or
/// rollback is only forwarded for the batch that is currently prepared.
/// The gate lock is held across the participant call, so a rollback that
/// overtakes a slow prepare waits for it.
pub struct ParticipantEndpoint {
    peers: Arc<PeerSet>,
    participant: Arc<dyn Participant>,
    gate: Mutex<Gate>,
}

impl ParticipantEndpoint {
    pub fn new(peers: Arc<PeerSet>, participant: Arc<dyn Participant>) -> Self {
        Self {
            peers,
            participant,
            gate: Mutex::new(Gate {
                last_decided: 0,
                open: None,
            }),
        }
    }

    fn check_sender(&self, from: &NodeId, request: &TwoPcRequest) -> Result<()> {
        if !self.peers.is_leader(from) {
            return Err(Error::ProtocolViolation(format!(
                "{} is not the leader of term {}",
                from,
                self.peers.term()
            )));
        }
        if request.term != self.peers.term() {
            return Err(Error::ProtocolViolation(format!(
                "request term {} does not match accepted term {}",
                request.term,
                self.peers.term()
            )));
        }
        Ok(())
    }

    pub async fn handle(&self, method: Method, from: NodeId, request: TwoPcRequest) -> Result<()> {
        self.check_sender(&from, &request)?;

        let mut gate = self.gate.lock().await;
        tracing::debug!("{} batch {} from {}", method, request.index, from);

        match method {
            Method::Prepare => self.prepare(&mut gate, request).await,
            Method::Commit => self.commit(&mut gate, request).await,
            Method::Rollback => self.rollback(&mut gate, request).await,
        }
    }

    async fn prepare(&self, gate: &mut Gate, request: TwoPcRequest) -> Result<()> {
        if request.index <= gate.last_decided {
            return Err(Error::ProtocolViolation(format!(
                "batch {} is not after last decided batch {}",
                request.index, gate.last_decided
            )));
        }

        if let Some(open) = gate.open.take() {
            if open.index >= request.index {
                let index = open.index;
                gate.open = Some(open);
                return Err(Error::ProtocolViolation(format!(
                    "batch {} is already prepared",
                    index
                )));
            }

            // the leader moved on without deciding the open batch
            tracing::warn!(
                "Batch {} abandoned by leader, rolling it back before batch {}",
                open.index,
                request.index
            );
            if let Err(e) = self.participant.rollback(&open.batch).await {
                tracing::warn!("Rollback of abandoned batch {} failed: {}", open.index, e);
            }
            gate.last_decided = open.index;
        }

        // stays open on failure: the leader rolls back everyone it asked
        let open = gate.open.insert(OpenBatch {
            index: request.index,
            batch: request.batch,
        });
        self.participant.prepare(&open.batch).await?;
        Ok(())
    }

    fn take_open(&self, gate: &mut Gate, method: Method, index: u64) -> Result<OpenBatch> {
        match gate.open.take() {
            Some(open) if open.index == index => Ok(open),
            Some(open) => {
                let prepared = open.index;
                gate.open = Some(open);
                Err(Error::ProtocolViolation(format!(
                    "{} for batch {} while batch {} is prepared",
                    method, index, prepared
                )))
            }
            None => {
                if index > gate.last_decided {
                    // a late prepare for this index must not be accepted
                    gate.last_decided = index;
                }
                Err(Error::ProtocolViolation(format!(
                    "{} for batch {} which was never prepared",
                    method, index
                )))
            }
        }
    }

    async fn commit(&self, gate: &mut Gate, request: TwoPcRequest) -> Result<()> {
        let open = self.take_open(gate, Method::Commit, request.index)?;
        gate.last_decided = open.index;
        self.participant.commit(&open.batch).await?;
        Ok(())
    }

    async fn rollback(&self, gate: &mut Gate, request: TwoPcRequest) -> Result<()> {
        let open = self.take_open(gate, Method::Rollback, request.index)?;
        gate.last_decided = open.index;
        self.participant.rollback(&open.batch).await?;
        Ok(())
    }
}

/// Binds Prepare, Commit and Rollback of `endpoint` under `service`.
///
/// Either all three methods are bound or none is.
pub fn register(
    endpoint: Arc<ParticipantEndpoint>,
    transport: &dyn Transport,
    service: &str,
) -> Result<()> {
    for method in Method::ALL {
        let endpoint = endpoint.clone();
        let handler: Handler = Arc::new(move |from: NodeId, payload: Vec<u8>| -> HandlerFuture {
            let endpoint = endpoint.clone();
            Box::pin(async move {
                let request = TwoPcRequest::decode(&payload)?;
                endpoint.handle(method, from, request).await?;
                Ok(Vec::new())
            })
        });

        if let Err(e) = transport.register_handler(service, method.as_str(), handler) {
            transport.deregister_service(service);
            return Err(e);
        }
    }
    Ok(())
}
