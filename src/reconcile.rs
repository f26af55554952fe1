//! Destroy-time cleanup of queued work.

use crate::config::{DispatchConfig, QueueKind};
use crate::error::{CleanupFailure, ReconcileError};
use crate::owner::OwnerKey;
use crate::placeholder::Placeholder;
use crate::broker::Broker;
use tracing::{error, info, instrument};

/// Descriptors removed per queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub online: usize,
    pub batch: usize,
}

impl Reconciled {
    pub fn total(&self) -> usize {
        self.online + self.batch
    }
}

pub struct Reconciler<B> {
    config: DispatchConfig,
    broker: B,
}

impl<B: Broker> Reconciler<B> {
    pub fn new(config: DispatchConfig, broker: B) -> Self {
        Reconciler { config, broker }
    }

    /// Stays resolvable whatever happens to owners; cleanup never touches it,
    /// nor any variant files already produced.
    pub fn placeholder(&self) -> Placeholder {
        Placeholder::new(self.config.placeholder.clone())
    }

    /// Remove every queued descriptor for `owner` from both queues and drop
    /// its processing flag.
    ///
    /// Every step is attempted even when an earlier one fails, so a partial
    /// outage removes as much as it can. Any failure is returned so the
    /// caller can report it and re-run cleanup later.
    #[instrument(skip(self, owner), fields(owner = %owner))]
    pub async fn on_owner_destroyed(&self, owner: &OwnerKey) -> Result<Reconciled, ReconcileError> {
        let mut reconciled = Reconciled::default();
        let mut failures = Vec::new();

        for kind in QueueKind::ALL {
            let queue = self.config.queue_name(kind);
            match self.broker.remove_matching(queue, owner).await {
                Ok(removed) => match kind {
                    QueueKind::Online => reconciled.online = removed,
                    QueueKind::Batch => reconciled.batch = removed,
                },
                Err(source) => {
                    error!(queue, error = %source, "Failed to remove queued jobs");
                    failures.push(CleanupFailure::Queue {
                        queue: queue.to_owned(),
                        source,
                    });
                }
            }
        }

        if let Err(source) = self.broker.remove(owner).await {
            error!(error = %source, "Failed to clear processing flag");
            failures.push(CleanupFailure::Flag(source));
        }

        if !failures.is_empty() {
            return Err(ReconcileError {
                owner: owner.clone(),
                failures,
                removed: reconciled.total(),
            });
        }

        info!(
            online = reconciled.online,
            batch = reconciled.batch,
            "Reconciled destroyed owner"
        );
        Ok(reconciled)
    }
}
