use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::participant::Participant;
use super::rpc::{Method, TwoPcRequest};
use super::state::{Phase, PhaseTracker};
use crate::network::Transport;
use crate::peers::{NodeId, PeerSet};
use crate::storage::{PendingBatch, PendingPhase, StateStorage};
use crate::util::errors::{Error, Result};

pub(crate) type SharedStorage = Arc<Mutex<Box<dyn StateStorage>>>;

/// Leader side of the protocol: drives one batch at a time through
/// prepare and commit (or rollback) on every member of the peer set.
///
/// Callers serialise `apply`; the coordinator itself keeps no lock across
/// batches.
pub(crate) struct Coordinator {
    pub(crate) peers: Arc<PeerSet>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) participant: Arc<dyn Participant>,
    pub(crate) storage: SharedStorage,
    pub(crate) phase: Arc<PhaseTracker>,
    pub(crate) service: String,
    pub(crate) timeout: Duration,
}

impl Coordinator {
    fn followers(&self) -> Vec<NodeId> {
        self.peers.followers().map(|s| s.id).collect()
    }

    /// Sends `method` to every target concurrently. Results come back in
    /// target order; the transport bounds each call by the process timeout.
    pub(crate) async fn broadcast(
        &self,
        method: Method,
        payload: &[u8],
        targets: &[NodeId],
    ) -> Vec<Result<()>> {
        let calls = targets.iter().map(|target| async move {
            self.transport
                .send(
                    target,
                    &self.service,
                    method.as_str(),
                    payload.to_vec(),
                    self.timeout,
                )
                .await
                .map(|_| ())
        });
        join_all(calls).await
    }

    /// Logs every failed call and returns the first one in target order.
    fn first_error(
        &self,
        method: Method,
        index: u64,
        targets: &[NodeId],
        results: Vec<Result<()>>,
    ) -> Option<Error> {
        let mut first = None;
        for (target, result) in targets.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("{} of batch {} failed on {}: {}", method, index, target, e);
                first.get_or_insert(e);
            }
        }
        first
    }

    /// Runs the full protocol for `batch`, returning its sequence index.
    pub(crate) async fn apply(&self, batch: Vec<u8>, cancel: &CancellationToken) -> Result<u64> {
        // left behind by a batch whose task died
        let stale = self.storage.lock().state().pending.clone();
        if let Some(pending) = stale {
            self.recover(pending).await;
            self.phase.reset();
        }

        let index = self.storage.lock().begin_batch(&batch)?;
        let payload = match (TwoPcRequest {
            term: self.peers.term(),
            index,
            batch: batch.clone(),
        })
        .encode()
        {
            Ok(payload) => payload,
            Err(e) => {
                self.finish(index);
                return Err(e);
            }
        };
        let followers = self.followers();

        self.phase.transition(index, Phase::Preparing);
        tracing::info!(
            "Preparing batch {} ({} bytes) on {} followers",
            index,
            batch.len(),
            followers.len()
        );

        let mut local_prepared = false;
        if let Err(err) = self
            .prepare_all(index, &payload, &batch, &followers, cancel, &mut local_prepared)
            .await
        {
            self.rollback_all(index, &payload, &batch, &followers, local_prepared, &err)
                .await;
            return Err(err);
        }

        self.phase.transition(index, Phase::Prepared);
        self.commit_all(index, &payload, &batch, &followers).await
    }

    async fn prepare_all(
        &self,
        index: u64,
        payload: &[u8],
        batch: &[u8],
        followers: &[NodeId],
        cancel: &CancellationToken,
        local_prepared: &mut bool,
    ) -> Result<()> {
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Batch {} cancelled during prepare", index);
                return Err(Error::Cancelled);
            }
            results = self.broadcast(Method::Prepare, payload, followers) => results,
        };
        if let Some(err) = self.first_error(Method::Prepare, index, followers, results) {
            return Err(err);
        }

        self.storage.lock().advance_batch(PendingPhase::LocalPrepare)?;
        *local_prepared = true;
        if let Err(e) = self.participant.prepare(batch).await {
            tracing::warn!("Local prepare of batch {} failed: {}", index, e);
            return Err(e.into());
        }

        if cancel.is_cancelled() {
            tracing::info!("Batch {} cancelled before commit", index);
            return Err(Error::Cancelled);
        }

        // from here on the batch is decided
        self.storage.lock().advance_batch(PendingPhase::Committing)?;
        Ok(())
    }

    async fn rollback_all(
        &self,
        index: u64,
        payload: &[u8],
        batch: &[u8],
        followers: &[NodeId],
        local_prepared: bool,
        cause: &Error,
    ) {
        self.phase.transition(index, Phase::RollingBack);
        tracing::warn!("Rolling back batch {}: {}", index, cause);

        let results = self.broadcast(Method::Rollback, payload, followers).await;
        self.first_error(Method::Rollback, index, followers, results);

        if local_prepared {
            if let Err(e) = self.participant.rollback(batch).await {
                tracing::warn!("Local rollback of batch {} failed: {}", index, e);
            }
        }

        self.finish(index);
        self.phase.transition(index, Phase::RolledBack);
        self.phase.transition(index, Phase::Idle);
    }

    async fn commit_all(
        &self,
        index: u64,
        payload: &[u8],
        batch: &[u8],
        followers: &[NodeId],
    ) -> Result<u64> {
        self.phase.transition(index, Phase::Committing);

        let results = self.broadcast(Method::Commit, payload, followers).await;
        let follower_error = self.first_error(Method::Commit, index, followers, results);

        let local_error = match self.participant.commit(batch).await {
            Ok(()) => None,
            Err(e) => {
                if follower_error.is_none() {
                    tracing::error!(
                        "Local commit of batch {} failed after all followers committed: {}",
                        index,
                        e
                    );
                } else {
                    tracing::error!("Local commit of batch {} failed: {}", index, e);
                }
                Some(Error::from(e))
            }
        };

        self.finish(index);
        self.phase.transition(index, Phase::Committed);
        self.phase.transition(index, Phase::Idle);

        match follower_error.or(local_error) {
            None => {
                tracing::info!("Committed batch {}", index);
                Ok(index)
            }
            Some(source) => Err(Error::CommitIncomplete {
                index,
                source: Box::new(source),
            }),
        }
    }

    /// Settles a batch found in flight after a restart, best effort.
    ///
    /// A batch that never reached the decision is rolled back everywhere it
    /// may have been prepared; a decided one has its commit driven again.
    /// Nodes that already settled it answer with a protocol violation, which
    /// is only logged.
    pub(crate) async fn recover(&self, pending: PendingBatch) {
        let PendingBatch {
            index,
            phase,
            batch,
        } = pending;
        let method = match phase {
            PendingPhase::Committing => Method::Commit,
            PendingPhase::Preparing | PendingPhase::LocalPrepare => Method::Rollback,
        };
        tracing::warn!(
            "Batch {} was interrupted in {:?}, recovering with {}",
            index,
            phase,
            method
        );

        let payload = match (TwoPcRequest {
            term: self.peers.term(),
            index,
            batch: batch.clone(),
        })
        .encode()
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Cannot encode recovered batch {}: {}", index, e);
                return;
            }
        };

        let followers = self.followers();
        let results = self.broadcast(method, &payload, &followers).await;
        self.first_error(method, index, &followers, results);

        let local = match phase {
            PendingPhase::Preparing => Ok(()),
            PendingPhase::LocalPrepare => self.participant.rollback(&batch).await,
            PendingPhase::Committing => self.participant.commit(&batch).await,
        };
        if let Err(e) = local {
            tracing::warn!("Local {} of recovered batch {} failed: {}", method, index, e);
        }

        self.finish(index);
    }

    fn finish(&self, index: u64) {
        if let Err(e) = self.storage.lock().finish_batch() {
            tracing::error!("Failed to clear in-flight record of batch {}: {}", index, e);
        }
    }
}
