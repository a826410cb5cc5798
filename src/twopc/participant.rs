use async_trait::async_trait;

use crate::util::errors::ParticipantError;

/// Local transactional backend that a batch is applied to.
///
/// Each node owns one. For a given batch the runtime calls `prepare` first
/// and then exactly one of `commit` or `rollback`, always with the same
/// bytes. Implementations must tolerate the same batch bytes arriving again
/// under a later index.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Validates and stages the batch. An error vetoes it cluster-wide.
    async fn prepare(&self, batch: &[u8]) -> Result<(), ParticipantError>;

    /// Makes a prepared batch durable. Errors are reported, not undone.
    async fn commit(&self, batch: &[u8]) -> Result<(), ParticipantError>;

    /// Discards a prepared batch.
    async fn rollback(&self, batch: &[u8]) -> Result<(), ParticipantError>;
}
