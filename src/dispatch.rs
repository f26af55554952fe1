//! Enqueue decision and the flag/queue commit.
//!
//! Writes are collected into a [`DispatchTxn`] and only reach a queue when the
//! host commits it, so an owner saved several times inside one transaction is
//! pushed once. The last qualifying write recorded before commit decides the
//! queue and the crop payload.

use crate::change::Change;
use crate::config::{DispatchConfig, QueueKind};
use crate::descriptor::JobDescriptor;
use crate::error::DispatchError;
use crate::owner::{OwnerKey, OwnerSnapshot};
use crate::broker::Broker;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    kind: QueueKind,
    descriptor: JobDescriptor,
}

/// Pending pushes for one host transaction. Dropping it discards them.
#[derive(Debug)]
pub struct DispatchTxn {
    id: Uuid,
    pending: Vec<(OwnerKey, Pending)>,
}

impl DispatchTxn {
    fn new() -> Self {
        DispatchTxn {
            id: Uuid::new_v4(),
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record one persisted write. Returns whether the owner now has a push
    /// pending in this transaction.
    pub fn record(&mut self, owner: &OwnerSnapshot, change: &Change) -> bool {
        if !change.should_enqueue() {
            return self.is_pending(&owner.key);
        }

        let entry = Pending {
            kind: QueueKind::for_owner(owner.online_processing),
            descriptor: JobDescriptor::new(&owner.key, change.crop().cloned()),
        };
        match self.pending.iter_mut().find(|(key, _)| key == &owner.key) {
            Some((_, existing)) => {
                debug!(txn = %self.id, owner = %owner.key, "Replacing pending push");
                *existing = entry;
            }
            None => self.pending.push((owner.key.clone(), entry)),
        }
        true
    }

    /// Drop the pending push for an owner destroyed before commit.
    pub fn forget(&mut self, owner: &OwnerKey) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(key, _)| key != owner);
        before != self.pending.len()
    }

    pub fn is_pending(&self, owner: &OwnerKey) -> bool {
        self.pending.iter().any(|(key, _)| key == owner)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn rollback(self) {
        if !self.pending.is_empty() {
            debug!(txn = %self.id, discarded = self.pending.len(), "Rolled back pending pushes");
        }
    }
}

/// What a commit put on the queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub queue: String,
    pub descriptor: JobDescriptor,
}

pub struct Coordinator<B> {
    config: DispatchConfig,
    broker: B,
}

impl<B: Broker> Coordinator<B> {
    pub fn new(config: DispatchConfig, broker: B) -> Self {
        Coordinator { config, broker }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn begin(&self) -> DispatchTxn {
        DispatchTxn::new()
    }

    /// A write outside any enclosing transaction commits on its own.
    pub async fn enqueue_if_needed(
        &self,
        owner: &OwnerSnapshot,
        change: &Change,
    ) -> Result<Option<Dispatched>, DispatchError> {
        let mut txn = self.begin();
        if !txn.record(owner, change) {
            debug!(owner = %owner.key, "Image unchanged, nothing to enqueue");
            return Ok(None);
        }
        Ok(self.commit(txn).await?.pop())
    }

    /// Flush pending pushes in the order owners were first recorded.
    ///
    /// Each owner's flag and push land together or not at all. On the first
    /// failure the remaining entries are discarded and the error returned;
    /// owners flushed before it stay committed.
    #[instrument(skip_all, fields(txn = %txn.id, pending = txn.pending.len()))]
    pub async fn commit(&self, txn: DispatchTxn) -> Result<Vec<Dispatched>, DispatchError> {
        let mut dispatched = Vec::with_capacity(txn.pending.len());
        for (owner, pending) in txn.pending {
            let queue = self.config.queue_name(pending.kind).to_owned();
            self.push_and_flag(&owner, &queue, &pending.descriptor)
                .await?;
            dispatched.push(Dispatched {
                queue,
                descriptor: pending.descriptor,
            });
        }
        Ok(dispatched)
    }

    async fn push_and_flag(
        &self,
        owner: &OwnerKey,
        queue: &str,
        descriptor: &JobDescriptor,
    ) -> Result<(), DispatchError> {
        if let Err(source) = self.broker.push_flagged(queue, descriptor).await {
            warn!(%owner, queue, error = %source, "Push failed, owner left untouched");
            return Err(DispatchError::Push {
                owner: owner.clone(),
                queue: queue.to_owned(),
                source,
            });
        }

        info!(%owner, queue, crop = descriptor.crop.is_some(), "Enqueued image processing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::detect;
    use crate::owner::CropFields;
    use crate::memory::MemoryBroker;
    use crate::queue::QueueClient;
    use crate::store::FlagStore;
    use chrono::{Duration, TimeZone, Utc};

    fn coordinator() -> (Coordinator<MemoryBroker>, MemoryBroker, MemoryBroker) {
        let broker = MemoryBroker::new();
        let coordinator = Coordinator::new(DispatchConfig::default(), broker.clone());
        (coordinator, broker.clone(), broker)
    }

    fn image(id: i64) -> OwnerSnapshot {
        OwnerSnapshot::new(OwnerKey::new("DelayedImage", id))
            .with_image(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn unchanged_write_is_a_no_op() {
        let (coordinator, queue, store) = coordinator();
        let owner = image(1);

        let result = coordinator
            .enqueue_if_needed(&owner, &Change::Unchanged)
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(queue.len("images").await.unwrap(), 0);
        assert_eq!(store.get(&owner.key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_write_in_transaction_wins() {
        let (coordinator, queue, store) = coordinator();
        let first = image(1).with_crop(CropFields::new(0, 10, 100, 100));
        let second = first
            .clone()
            .with_image(Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap())
            .with_crop(CropFields::default())
            .online(true);

        let mut txn = coordinator.begin();
        txn.record(&first, &detect(None, &first));
        txn.record(&second, &detect(Some(&first), &second));
        assert_eq!(txn.len(), 1);
        coordinator.commit(txn).await.unwrap();

        assert_eq!(queue.len("non_online_images").await.unwrap(), 0);
        assert_eq!(
            queue.snapshot("images"),
            vec![JobDescriptor::new(&first.key, None)]
        );
        assert!(store.is_processing(&first.key));
    }

    #[tokio::test]
    async fn rollback_discards_pending_push() {
        let (coordinator, queue, store) = coordinator();
        let owner = image(1);

        let mut txn = coordinator.begin();
        txn.record(&owner, &detect(None, &owner));
        txn.rollback();

        assert_eq!(queue.len("non_online_images").await.unwrap(), 0);
        assert!(!store.is_processing(&owner.key));
    }

    #[tokio::test]
    async fn forget_drops_owner_destroyed_before_commit() {
        let (coordinator, queue, _store) = coordinator();
        let kept = image(1);
        let destroyed = image(2);

        let mut txn = coordinator.begin();
        txn.record(&kept, &detect(None, &kept));
        txn.record(&destroyed, &detect(None, &destroyed));
        assert!(txn.forget(&destroyed.key));
        let dispatched = coordinator.commit(txn).await.unwrap();

        assert_eq!(dispatched.len(), 1);
        assert_eq!(
            queue.snapshot("non_online_images"),
            vec![JobDescriptor::new(&kept.key, None)]
        );
    }

    #[tokio::test]
    async fn unchanged_write_keeps_earlier_pending_push() {
        let (coordinator, queue, _store) = coordinator();
        let owner = image(1);
        let touched = owner.clone().with_image(owner.img_updated_at.unwrap() + Duration::hours(1));

        let mut txn = coordinator.begin();
        assert!(txn.record(&touched, &detect(Some(&owner), &touched)));
        assert!(txn.record(&touched, &detect(Some(&touched), &touched)));
        coordinator.commit(txn).await.unwrap();

        assert_eq!(queue.len("non_online_images").await.unwrap(), 1);
    }
}
