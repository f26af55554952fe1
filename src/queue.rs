//! Queue transport capability.
//!
//! Queues are FIFO lists addressed by name. The coordinator only appends,
//! destroy-time cleanup only removes by owner, and the worker side claims
//! from the head. A claimed job stays stored until it is acked, so a crash
//! while it is being processed never loses it. Descriptors are never
//! rewritten in place.

use crate::descriptor::JobDescriptor;
use crate::error::QueueError;
use crate::owner::OwnerKey;
use async_trait::async_trait;

/// A job taken off the head of a queue, held until acked or released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: i64,
    pub queue: String,
    pub descriptor: JobDescriptor,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Append at the tail.
    async fn push(&self, queue: &str, descriptor: &JobDescriptor) -> Result<(), QueueError>;

    /// Remove every descriptor for `owner`, waiting or claimed, wherever it
    /// sits, keeping the relative order of the rest. Returns how many were removed.
    async fn remove_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError>;

    /// Claim the oldest waiting job, if any.
    async fn pop(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError>;

    /// Drop a claimed job for good. A job already removed is not an error.
    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError>;

    /// Put a claimed job back to waiting, in its original position.
    async fn release(&self, job: &ClaimedJob) -> Result<(), QueueError>;

    /// Put every claimed job of `queue` back to waiting.
    async fn release_all(&self, queue: &str) -> Result<usize, QueueError>;

    /// Waiting and claimed jobs for `owner`.
    async fn count_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError>;

    /// Waiting jobs only.
    async fn len(&self, queue: &str) -> Result<usize, QueueError>;
}

#[async_trait]
impl<Q: QueueClient + ?Sized> QueueClient for std::sync::Arc<Q> {
    async fn push(&self, queue: &str, descriptor: &JobDescriptor) -> Result<(), QueueError> {
        (**self).push(queue, descriptor).await
    }

    async fn remove_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        (**self).remove_matching(queue, owner).await
    }

    async fn pop(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        (**self).pop(queue).await
    }

    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        (**self).ack(job).await
    }

    async fn release(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        (**self).release(job).await
    }

    async fn release_all(&self, queue: &str) -> Result<usize, QueueError> {
        (**self).release_all(queue).await
    }

    async fn count_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        (**self).count_matching(queue, owner).await
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        (**self).len(queue).await
    }
}
