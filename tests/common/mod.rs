//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p_identity::Keypair;
use parking_lot::Mutex;
use tempfile::TempDir;
use twopc::network::{MemoryNetwork, MemoryTransport};
use twopc::{
    NodeId, Participant, ParticipantError, PeerSet, Role, Server, TwoPcConfig, TwoPcOptions,
    TwoPcRuntime,
};

pub const TEST_TERM: u64 = 1;
pub const TEST_TIMEOUT: Duration = Duration::from_millis(300);

/// Ordered record of participant calls shared by every node of a cluster.
#[derive(Default)]
pub struct CallLog {
    entries: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, entry: String) {
        self.entries.lock().push(entry);
    }

    pub fn get(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Participant that records each call as `<label>_<op>` and can be told to
/// fail or stall.
pub struct RecordingParticipant {
    label: String,
    log: Arc<CallLog>,
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    fail_prepare: AtomicBool,
    fail_commit: AtomicBool,
    panic_prepare: AtomicBool,
    prepare_delay: Mutex<Duration>,
}

impl RecordingParticipant {
    pub fn new(label: &str, log: Arc<CallLog>) -> Self {
        Self {
            label: label.to_string(),
            log,
            calls: Mutex::new(Vec::new()),
            fail_prepare: AtomicBool::new(false),
            fail_commit: AtomicBool::new(false),
            panic_prepare: AtomicBool::new(false),
            prepare_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes the next prepares panic instead of returning.
    pub fn panic_prepare(&self, panic: bool) {
        self.panic_prepare.store(panic, Ordering::SeqCst);
    }

    pub fn delay_prepare(&self, delay: Duration) {
        *self.prepare_delay.lock() = delay;
    }

    /// Operations received by this participant, with their batch bytes.
    pub fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().clone()
    }

    pub fn ops(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(op, _)| op.clone()).collect()
    }

    fn record(&self, op: &str, batch: &[u8]) {
        self.calls.lock().push((op.to_string(), batch.to_vec()));
        self.log.push(format!("{}_{}", self.label, op));
    }
}

#[async_trait]
impl Participant for RecordingParticipant {
    async fn prepare(&self, batch: &[u8]) -> Result<(), ParticipantError> {
        let delay = *self.prepare_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic_prepare.load(Ordering::SeqCst) {
            panic!("{} crashed during prepare", self.label);
        }
        self.record("prepare", batch);
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(ParticipantError::new(format!("{} refused prepare", self.label)));
        }
        Ok(())
    }

    async fn commit(&self, batch: &[u8]) -> Result<(), ParticipantError> {
        self.record("commit", batch);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ParticipantError::new(format!("{} refused commit", self.label)));
        }
        Ok(())
    }

    async fn rollback(&self, batch: &[u8]) -> Result<(), ParticipantError> {
        self.record("rollback", batch);
        Ok(())
    }
}

pub struct TestNode {
    pub id: NodeId,
    pub keypair: Keypair,
    pub runtime: TwoPcRuntime,
    pub participant: Arc<RecordingParticipant>,
    pub transport: Arc<MemoryTransport>,
    pub storage_dir: PathBuf,
}

/// Cluster of runtimes on one in-process network. Node 0 is the leader.
pub struct TestCluster {
    pub network: MemoryNetwork,
    pub nodes: Vec<TestNode>,
    pub log: Arc<CallLog>,
    pub peers: PeerSet,
    pub signer: Keypair,
    _dirs: Vec<TempDir>,
}

/// Builds and signs a peer set whose first key is the leader.
pub fn signed_peer_set(term: u64, keys: &[Keypair], signer: &Keypair) -> PeerSet {
    let servers = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let role = if i == 0 { Role::Leader } else { Role::Follower };
            Server::from_public_key(role, key.public())
        })
        .collect();
    let mut peers = PeerSet::new(term, servers, signer.public()).unwrap();
    peers.sign(signer).unwrap();
    peers
}

pub fn test_options(node: NodeId) -> TwoPcOptions {
    TwoPcOptions::new()
        .with_node_id(node)
        .with_process_timeout(TEST_TIMEOUT)
        .with_service_name("Kayak")
}

impl TestCluster {
    /// Starts `size` nodes and initializes every runtime.
    pub async fn start(size: usize) -> Self {
        let cluster = Self::build(size);
        for node in &cluster.nodes {
            node.runtime.init().await.unwrap();
        }
        cluster
    }

    /// Creates the runtimes without calling `init`.
    pub fn build(size: usize) -> Self {
        twopc::util::logging::init_test_tracing();

        let network = MemoryNetwork::new();
        let log = Arc::new(CallLog::default());
        let signer = Keypair::generate_ed25519();
        let keys: Vec<Keypair> = (0..size).map(|_| Keypair::generate_ed25519()).collect();
        let peers = signed_peer_set(TEST_TERM, &keys, &signer);

        let mut nodes = Vec::new();
        let mut dirs = Vec::new();
        for (i, keypair) in keys.into_iter().enumerate() {
            let label = if i == 0 { "l" } else { "f" };
            let participant = Arc::new(RecordingParticipant::new(label, log.clone()));
            let dir = TempDir::new().unwrap();
            let id = NodeId::from_public_key(&keypair.public());
            let transport = network.join(id);
            let runtime = TwoPcRuntime::new(
                peers.clone(),
                TwoPcConfig::new(dir.path(), transport.clone(), participant.clone())
                    .with_options(test_options(id)),
            )
            .unwrap();

            nodes.push(TestNode {
                id,
                keypair,
                runtime,
                participant,
                transport,
                storage_dir: dir.path().to_path_buf(),
            });
            dirs.push(dir);
        }

        Self {
            network,
            nodes,
            log,
            peers,
            signer,
            _dirs: dirs,
        }
    }

    pub fn leader(&self) -> &TestNode {
        &self.nodes[0]
    }

    pub fn followers(&self) -> &[TestNode] {
        &self.nodes[1..]
    }

    /// Replaces node `i` with a fresh runtime on the same storage directory
    /// and participant, as after a process restart. Does not call `init`.
    pub async fn restart(&mut self, i: usize, peers: PeerSet) -> twopc::Result<()> {
        self.nodes[i].runtime.shutdown().await;

        let node = &mut self.nodes[i];
        let transport = self.network.join(node.id);
        let runtime = TwoPcRuntime::new(
            peers,
            TwoPcConfig::new(&node.storage_dir, transport.clone(), node.participant.clone())
                .with_options(test_options(node.id)),
        )?;
        node.transport = transport;
        node.runtime = runtime;
        Ok(())
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.runtime.shutdown().await;
        }
    }
}
