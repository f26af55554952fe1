//! Durable `processing` flag, kept per owner.
//!
//! A missing entry means the owner is unknown to background processing or was
//! destroyed; the worker side treats such descriptors as no-ops. Setting and
//! clearing the flag go through [`Broker`](crate::broker::Broker), together
//! with the queue change they belong to.

use crate::error::StoreError;
use crate::owner::OwnerKey;
use async_trait::async_trait;

#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get(&self, owner: &OwnerKey) -> Result<Option<bool>, StoreError>;

    async fn remove(&self, owner: &OwnerKey) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: FlagStore + ?Sized> FlagStore for std::sync::Arc<S> {
    async fn get(&self, owner: &OwnerKey) -> Result<Option<bool>, StoreError> {
        (**self).get(owner).await
    }

    async fn remove(&self, owner: &OwnerKey) -> Result<(), StoreError> {
        (**self).remove(owner).await
    }
}
