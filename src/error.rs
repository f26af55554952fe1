use crate::owner::OwnerKey;
use thiserror::Error;

/// Queue transport failures.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue transport unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed job descriptor: {0}")]
    Payload(#[from] serde_json::Error),
}

impl QueueError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Failures persisting the `processing` flag.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("flag store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// A qualifying write could not be dispatched. Neither the flag nor the
/// queue was changed.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to push job for {owner} to queue {queue}: {source}")]
    Push {
        owner: OwnerKey,
        queue: String,
        #[source]
        source: QueueError,
    },
}

/// One step of destroy-time cleanup that did not complete.
#[derive(Error, Debug)]
pub enum CleanupFailure {
    #[error("queue {queue}: {source}")]
    Queue {
        queue: String,
        #[source]
        source: QueueError,
    },

    #[error("processing flag: {0}")]
    Flag(#[source] StoreError),
}

/// Destroy-time cleanup was incomplete; descriptors may still reference the
/// owner and cleanup should be re-run.
#[derive(Error, Debug)]
#[error("cleanup for destroyed {owner} incomplete ({} step(s) failed)", .failures.len())]
pub struct ReconcileError {
    pub owner: OwnerKey,
    pub failures: Vec<CleanupFailure>,
    /// Descriptors that were removed before the failure was hit.
    pub removed: usize,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue name for {0} processing must not be empty")]
    EmptyQueueName(&'static str),

    #[error("online and non-online processing share queue {0}")]
    SharedQueue(String),
}
