use crate::peers::PeerSet;
use crate::util::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

/// How far an in-flight batch got before the record was last written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingPhase {
    /// Prepare sent to followers, local participant not yet called
    Preparing,
    /// Local prepare was invoked; a rollback must reach the local participant
    LocalPrepare,
    /// Decision taken; the batch must not be rolled back
    Committing,
}

/// Batch the leader was working on when the state was last saved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub index: u64,
    pub phase: PendingPhase,
    pub batch: Vec<u8>,
}

/// Persistent state that must survive crashes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    /// Highest peer-set term accepted (initialized to 0)
    pub term: u64,
    /// Signature of the peer set accepted for `term`
    pub peers_signature: Vec<u8>,
    /// Last sequence index handed out
    pub last_index: u64,
    /// Batch in flight, if any
    pub pending: Option<PendingBatch>,
}

/// Trait for persistent state storage
pub trait StateStorage: Send {
    fn state(&self) -> &PersistentState;
    fn save_state(&mut self, state: PersistentState) -> Result<()>;

    /// Rejects a peer set older than the accepted one, or a different peer
    /// set claiming the accepted term.
    fn check_peers(&self, peers: &PeerSet) -> Result<()> {
        let state = self.state();
        if peers.term() < state.term {
            return Err(Error::Configuration(format!(
                "peer set term {} is older than accepted term {}",
                peers.term(),
                state.term
            )));
        }
        if peers.term() == state.term
            && !state.peers_signature.is_empty()
            && state.peers_signature != peers.signature()
        {
            return Err(Error::Configuration(format!(
                "a different peer set was already accepted for term {}",
                state.term
            )));
        }
        Ok(())
    }

    /// Records `peers` as the accepted configuration.
    fn accept_peers(&mut self, peers: &PeerSet) -> Result<()> {
        self.check_peers(peers)?;
        if self.state().term == peers.term() && self.state().peers_signature == peers.signature() {
            return Ok(());
        }

        let mut state = self.state().clone();
        state.term = peers.term();
        state.peers_signature = peers.signature().to_vec();
        self.save_state(state)?;
        tracing::info!("Accepted peer set for term {}", peers.term());
        Ok(())
    }

    /// Assigns the next sequence index to `batch` and records it as in flight.
    fn begin_batch(&mut self, batch: &[u8]) -> Result<u64> {
        let mut state = self.state().clone();
        if let Some(pending) = &state.pending {
            return Err(Error::Storage(format!(
                "batch {} is still in flight",
                pending.index
            )));
        }
        state.last_index += 1;
        let index = state.last_index;
        state.pending = Some(PendingBatch {
            index,
            phase: PendingPhase::Preparing,
            batch: batch.to_vec(),
        });
        self.save_state(state)?;
        Ok(index)
    }

    fn advance_batch(&mut self, phase: PendingPhase) -> Result<()> {
        let mut state = self.state().clone();
        match state.pending.as_mut() {
            Some(pending) => pending.phase = phase,
            None => return Err(Error::Storage("no batch in flight".to_string())),
        }
        self.save_state(state)
    }

    /// Clears the in-flight record once the batch reached a final outcome.
    fn finish_batch(&mut self) -> Result<()> {
        if self.state().pending.is_none() {
            return Ok(());
        }
        let mut state = self.state().clone();
        state.pending = None;
        self.save_state(state)
    }
}

/// File-based state storage implementation
pub struct FileStateStorage {
    data_dir: PathBuf,
    state: PersistentState,
}

impl FileStateStorage {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        fs::create_dir_all(&data_dir)?;

        let mut storage = Self {
            data_dir,
            state: PersistentState::default(),
        };

        // Load existing state from disk
        storage.state = storage.load_from_disk()?;

        Ok(storage)
    }

    fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("twopc_state.bin")
    }

    fn load_from_disk(&self) -> Result<PersistentState> {
        let state_path = self.state_file_path();

        if !state_path.exists() {
            return Ok(PersistentState::default());
        }

        let mut file = File::open(&state_path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        if buffer.is_empty() {
            return Ok(PersistentState::default());
        }

        let state: PersistentState = bincode::deserialize(&buffer)
            .map_err(|e| Error::Storage(format!("corrupt state file {:?}: {}", state_path, e)))?;

        tracing::info!(
            "Loaded persistent state: term={}, last_index={}, pending={:?}",
            state.term,
            state.last_index,
            state.pending.as_ref().map(|p| (p.index, p.phase))
        );

        Ok(state)
    }

    fn save_to_disk(&self) -> Result<()> {
        let state_path = self.state_file_path();
        let encoded = bincode::serialize(&self.state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&state_path)?;

        file.write_all(&encoded)?;
        file.sync_all()?;

        Ok(())
    }
}

impl StateStorage for FileStateStorage {
    fn state(&self) -> &PersistentState {
        &self.state
    }

    fn save_state(&mut self, state: PersistentState) -> Result<()> {
        self.state = state;
        self.save_to_disk()
    }
}
