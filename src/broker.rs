//! Queues and flags behind one commit boundary.

use crate::descriptor::JobDescriptor;
use crate::error::QueueError;
use crate::owner::OwnerKey;
use crate::queue::QueueClient;
use crate::store::FlagStore;
use async_trait::async_trait;

/// The operations where the `processing` flag and the queue contents must
/// move together. Implementations commit each call as a unit.
#[async_trait]
pub trait Broker: QueueClient + FlagStore {
    /// Mark the descriptor's owner as processing and append the descriptor.
    /// On error neither happened.
    async fn push_flagged(&self, queue: &str, descriptor: &JobDescriptor)
        -> Result<(), QueueError>;

    /// Clear the owner's flag unless a job for it is still stored in one of
    /// `queues`. Never creates a flag for an owner without one. Returns
    /// whether the flag was cleared.
    async fn finish_if_idle(&self, queues: &[&str], owner: &OwnerKey) -> Result<bool, QueueError>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn push_flagged(
        &self,
        queue: &str,
        descriptor: &JobDescriptor,
    ) -> Result<(), QueueError> {
        (**self).push_flagged(queue, descriptor).await
    }

    async fn finish_if_idle(&self, queues: &[&str], owner: &OwnerKey) -> Result<bool, QueueError> {
        (**self).finish_if_idle(queues, owner).await
    }
}
