use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::coordinator::{Coordinator, SharedStorage};
use super::handler::{self, ParticipantEndpoint};
use super::state::{Phase, PhaseTracker};
use crate::config::TwoPcConfig;
use crate::network::Transport;
use crate::peers::{NodeId, PeerSet, Role};
use crate::storage::{FileStateStorage, StateStorage};
use crate::util::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Shutdown,
}

struct Inner {
    node_id: NodeId,
    peers: Arc<PeerSet>,
    transport: Arc<dyn Transport>,
    service: String,
    coordinator: Arc<Coordinator>,
    endpoint: Arc<ParticipantEndpoint>,
    storage: SharedStorage,
    phase: Arc<PhaseTracker>,
    lifecycle: Mutex<Lifecycle>,
    /// Held for the whole of one batch; queues concurrent `apply` calls
    sequencer: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
    span: tracing::Span,
}

/// Two-phase-commit replication runtime of one node.
///
/// Every node registers the participant-side handlers on `init`. On the
/// leader named by the peer set, [`TwoPcRuntime::apply`] replicates a batch
/// to all members and returns once it was committed or rolled back
/// everywhere. Cloning yields another handle to the same runtime.
#[derive(Clone)]
pub struct TwoPcRuntime {
    inner: Arc<Inner>,
}

impl TwoPcRuntime {
    /// Validates `peers` and `config` and opens the node's persisted state.
    /// Nothing is registered on the transport until [`TwoPcRuntime::init`].
    pub fn new(peers: PeerSet, config: TwoPcConfig) -> Result<Self> {
        peers.validate()?;
        config.validate()?;

        let node_id = config.node_id();
        let role = match peers.get(&node_id) {
            Some(server) => server.role,
            None => {
                return Err(Error::Configuration(format!(
                    "node {} is not a member of the peer set",
                    node_id
                )))
            }
        };

        let storage = FileStateStorage::new(config.storage_dir.clone())?;
        storage.check_peers(&peers)?;
        let storage: Box<dyn StateStorage> = Box::new(storage);
        let storage: SharedStorage = Arc::new(Mutex::new(storage));

        let service = config.options.service_name.clone();
        let span = match &config.options.span {
            Some(parent) => tracing::info_span!(parent: parent, "twopc", node = %node_id, service = %service),
            None => tracing::info_span!("twopc", node = %node_id, service = %service),
        };

        let peers = Arc::new(peers);
        let phase = Arc::new(PhaseTracker::new());
        let coordinator = Arc::new(Coordinator {
            peers: peers.clone(),
            transport: config.transport.clone(),
            participant: config.participant.clone(),
            storage: storage.clone(),
            phase: phase.clone(),
            service: service.clone(),
            timeout: config.options.process_timeout(),
        });
        let endpoint = Arc::new(ParticipantEndpoint::new(
            peers.clone(),
            config.participant.clone(),
        ));

        span.in_scope(|| {
            tracing::info!(
                "Created runtime as {} for term {} with {} servers",
                role,
                peers.term(),
                peers.servers().len()
            )
        });

        Ok(Self {
            inner: Arc::new(Inner {
                node_id,
                peers,
                transport: config.transport,
                service,
                coordinator,
                endpoint,
                storage,
                phase,
                lifecycle: Mutex::new(Lifecycle::Created),
                sequencer: Arc::new(tokio::sync::Mutex::new(())),
                shutdown: CancellationToken::new(),
                span,
            }),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn peers(&self) -> &PeerSet {
        &self.inner.peers
    }

    pub fn is_leader(&self) -> bool {
        self.inner.peers.is_leader(&self.inner.node_id)
    }

    /// Phase of the batch currently being applied; `Idle` between batches
    /// and always on followers.
    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Accepts the peer set, settles a batch left over from a previous run
    /// and registers the handlers. Calling it again after success is a
    /// no-op.
    pub async fn init(&self) -> Result<()> {
        let span = self.inner.span.clone();
        self.init_inner().instrument(span).await
    }

    async fn init_inner(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.sequencer.lock().await;

        match *inner.lifecycle.lock() {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Shutdown => return Err(Error::Shutdown),
            Lifecycle::Created => {}
        }

        let pending = {
            let mut storage = inner.storage.lock();
            storage.accept_peers(&inner.peers)?;
            storage.state().pending.clone()
        };

        if let Some(pending) = pending {
            if self.is_leader() {
                inner.coordinator.recover(pending).await;
            } else {
                tracing::warn!(
                    "Discarding in-flight record of batch {} left by a previous leader role",
                    pending.index
                );
                inner.storage.lock().finish_batch()?;
            }
        }

        handler::register(
            inner.endpoint.clone(),
            inner.transport.as_ref(),
            &inner.service,
        )?;

        {
            let mut lifecycle = inner.lifecycle.lock();
            if *lifecycle == Lifecycle::Shutdown {
                inner.transport.deregister_service(&inner.service);
                return Err(Error::Shutdown);
            }
            *lifecycle = Lifecycle::Running;
        }

        let role = if self.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        };
        tracing::info!(
            "Initialized as {} for term {}, last index {}",
            role,
            inner.peers.term(),
            inner.storage.lock().state().last_index
        );
        Ok(())
    }

    fn check_ready(&self) -> Result<()> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Shutdown => return Err(Error::Shutdown),
            Lifecycle::Created if self.is_leader() => return Err(Error::NotInitialized),
            _ => {}
        }
        if !self.is_leader() {
            return Err(Error::NotLeader(self.inner.node_id));
        }
        Ok(())
    }

    /// Replicates `batch` to every member and returns its sequence index.
    ///
    /// Batches are applied one at a time in call order. Fails with the
    /// first prepare error after rolling the batch back everywhere, or with
    /// [`Error::CommitIncomplete`] when the batch was decided but a commit
    /// call failed.
    pub async fn apply(&self, batch: Vec<u8>) -> Result<u64> {
        self.apply_with_cancel(batch, &CancellationToken::new()).await
    }

    /// Like [`TwoPcRuntime::apply`], giving up when `cancel` fires while the
    /// batch is queued or being prepared. Once commit has started the batch
    /// runs to completion.
    ///
    /// Dropping the returned future counts as cancelling it: the batch keeps
    /// the sequencer until it has been rolled back or committed.
    pub async fn apply_with_cancel(
        &self,
        batch: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let span = self.inner.span.clone();
        self.apply_inner(batch, cancel).instrument(span).await
    }

    async fn apply_inner(&self, batch: Vec<u8>, cancel: &CancellationToken) -> Result<u64> {
        let inner = &self.inner;
        self.check_ready()?;

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = inner.shutdown.cancelled() => return Err(Error::Shutdown),
            guard = inner.sequencer.clone().lock_owned() => guard,
        };
        // state may have changed while queued
        self.check_ready()?;

        let batch_cancel = cancel.child_token();
        let _abandon = batch_cancel.clone().drop_guard();
        let coordinator = inner.coordinator.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                coordinator.apply(batch, &batch_cancel).await
            }
            .in_current_span(),
        );

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Batch task did not complete: {}", e);
                Err(Error::Task(e.to_string()))
            }
        }
    }

    /// Unregisters the handlers and waits for an in-flight batch to finish.
    /// Queued `apply` calls fail with [`Error::Shutdown`]. Safe to call more
    /// than once.
    pub async fn shutdown(&self) {
        let span = self.inner.span.clone();
        self.shutdown_inner().instrument(span).await
    }

    async fn shutdown_inner(&self) {
        let inner = &self.inner;
        let previous = {
            let mut lifecycle = inner.lifecycle.lock();
            std::mem::replace(&mut *lifecycle, Lifecycle::Shutdown)
        };
        if previous == Lifecycle::Shutdown {
            return;
        }

        inner.shutdown.cancel();
        if previous == Lifecycle::Running {
            inner.transport.deregister_service(&inner.service);
        }

        let _guard = inner.sequencer.lock().await;
        tracing::info!("Runtime shut down");
    }
}
