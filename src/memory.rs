use crate::broker::Broker;
use crate::descriptor::JobDescriptor;
use crate::error::{QueueError, StoreError};
use crate::owner::OwnerKey;
use crate::queue::{ClaimedJob, QueueClient};
use crate::store::FlagStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    id: i64,
    descriptor: JobDescriptor,
    claimed: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    queues: HashMap<String, VecDeque<Entry>>,
    flags: HashMap<OwnerKey, bool>,
}

impl State {
    fn push(&mut self, queue: &str, descriptor: &JobDescriptor) {
        self.next_id += 1;
        let entry = Entry {
            id: self.next_id,
            descriptor: descriptor.clone(),
            claimed: false,
        };
        self.queues
            .entry(queue.to_owned())
            .or_default()
            .push_back(entry);
    }

    fn entry_mut(&mut self, job: &ClaimedJob) -> Option<&mut Entry> {
        self.queues
            .get_mut(&job.queue)?
            .iter_mut()
            .find(|entry| entry.id == job.id)
    }

    fn count_matching(&self, queue: &str, owner: &OwnerKey) -> usize {
        self.queues
            .get(queue)
            .map(|q| q.iter().filter(|e| e.descriptor.belongs_to(owner)).count())
            .unwrap_or(0)
    }
}

/// In-process queues and flags under a single lock. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of `queue`, waiting and claimed, head first.
    pub fn snapshot(&self, queue: &str) -> Vec<JobDescriptor> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|e| e.descriptor.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_processing(&self, owner: &OwnerKey) -> bool {
        self.state.lock().flags.get(owner).copied().unwrap_or(false)
    }
}

#[async_trait]
impl QueueClient for MemoryBroker {
    async fn push(&self, queue: &str, descriptor: &JobDescriptor) -> Result<(), QueueError> {
        self.state.lock().push(queue, descriptor);
        Ok(())
    }

    async fn remove_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|entry| !entry.descriptor.belongs_to(owner));
        Ok(before - entries.len())
    }

    async fn pop(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let mut state = self.state.lock();
        let Some(entry) = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.iter_mut().find(|e| !e.claimed))
        else {
            return Ok(None);
        };
        entry.claimed = true;
        Ok(Some(ClaimedJob {
            id: entry.id,
            queue: queue.to_owned(),
            descriptor: entry.descriptor.clone(),
        }))
    }

    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        if let Some(entries) = self.state.lock().queues.get_mut(&job.queue) {
            entries.retain(|entry| entry.id != job.id);
        }
        Ok(())
    }

    async fn release(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        if let Some(entry) = self.state.lock().entry_mut(job) {
            entry.claimed = false;
        }
        Ok(())
    }

    async fn release_all(&self, queue: &str) -> Result<usize, QueueError> {
        let mut state = self.state.lock();
        let Some(entries) = state.queues.get_mut(queue) else {
            return Ok(0);
        };
        let mut released = 0;
        for entry in entries.iter_mut().filter(|e| e.claimed) {
            entry.claimed = false;
            released += 1;
        }
        Ok(released)
    }

    async fn count_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        Ok(self.state.lock().count_matching(queue, owner))
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.iter().filter(|e| !e.claimed).count()))
    }
}

#[async_trait]
impl FlagStore for MemoryBroker {
    async fn get(&self, owner: &OwnerKey) -> Result<Option<bool>, StoreError> {
        Ok(self.state.lock().flags.get(owner).copied())
    }

    async fn remove(&self, owner: &OwnerKey) -> Result<(), StoreError> {
        self.state.lock().flags.remove(owner);
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push_flagged(
        &self,
        queue: &str,
        descriptor: &JobDescriptor,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.flags.insert(descriptor.owner(), true);
        state.push(queue, descriptor);
        Ok(())
    }

    async fn finish_if_idle(&self, queues: &[&str], owner: &OwnerKey) -> Result<bool, QueueError> {
        let mut state = self.state.lock();
        if queues.iter().any(|queue| state.count_matching(queue, owner) > 0) {
            return Ok(false);
        }
        match state.flags.get_mut(owner) {
            Some(processing) => {
                *processing = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(owner_type: &str, owner_id: i64) -> JobDescriptor {
        JobDescriptor::new(&OwnerKey::new(owner_type, owner_id), None)
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let broker = MemoryBroker::new();
        broker.push("images", &job("Logo", 1)).await.unwrap();
        broker.push("images", &job("Logo", 2)).await.unwrap();

        let first = broker.pop("images").await.unwrap().unwrap();
        let second = broker.pop("images").await.unwrap().unwrap();

        assert_eq!(first.descriptor, job("Logo", 1));
        assert_eq!(second.descriptor, job("Logo", 2));
        assert_eq!(broker.pop("images").await.unwrap(), None);
    }

    #[tokio::test]
    async fn claimed_job_survives_until_acked() {
        let broker = MemoryBroker::new();
        broker.push("images", &job("Logo", 1)).await.unwrap();

        let claimed = broker.pop("images").await.unwrap().unwrap();
        assert_eq!(broker.len("images").await.unwrap(), 0);
        assert_eq!(broker.snapshot("images"), vec![job("Logo", 1)]);

        assert_eq!(broker.release_all("images").await.unwrap(), 1);
        let again = broker.pop("images").await.unwrap().unwrap();
        assert_eq!(again.id, claimed.id);

        broker.ack(&again).await.unwrap();
        assert!(broker.snapshot("images").is_empty());
    }

    #[tokio::test]
    async fn release_keeps_original_position() {
        let broker = MemoryBroker::new();
        broker.push("images", &job("Logo", 1)).await.unwrap();
        broker.push("images", &job("Logo", 2)).await.unwrap();

        let first = broker.pop("images").await.unwrap().unwrap();
        broker.release(&first).await.unwrap();

        let next = broker.pop("images").await.unwrap().unwrap();
        assert_eq!(next.descriptor, job("Logo", 1));
    }

    #[tokio::test]
    async fn removes_from_anywhere_keeping_order() {
        let broker = MemoryBroker::new();
        for descriptor in [
            job("Logo", 1),
            job("Avatar", 2),
            job("Logo", 2),
            job("Avatar", 2),
            job("Logo", 3),
        ] {
            broker.push("images", &descriptor).await.unwrap();
        }

        let removed = broker
            .remove_matching("images", &OwnerKey::new("Avatar", 2))
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(
            broker.snapshot("images"),
            vec![job("Logo", 1), job("Logo", 2), job("Logo", 3)]
        );
    }

    #[tokio::test]
    async fn finish_keeps_flag_while_work_is_stored() {
        let broker = MemoryBroker::new();
        let owner = OwnerKey::new("Logo", 1);
        broker.push_flagged("images", &job("Logo", 1)).await.unwrap();

        let claimed = broker.pop("images").await.unwrap().unwrap();
        assert!(!broker.finish_if_idle(&["images"], &owner).await.unwrap());
        assert!(broker.is_processing(&owner));

        broker.ack(&claimed).await.unwrap();
        assert!(broker.finish_if_idle(&["images"], &owner).await.unwrap());
        assert_eq!(broker.get(&owner).await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn finish_does_not_resurrect_removed_owner() {
        let broker = MemoryBroker::new();
        let owner = OwnerKey::new("Logo", 1);

        assert!(!broker.finish_if_idle(&["images"], &owner).await.unwrap());
        assert_eq!(broker.get(&owner).await.unwrap(), None);
    }
}
