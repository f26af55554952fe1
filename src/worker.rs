use crate::descriptor::JobDescriptor;
use crate::queue::ClaimedJob;
use crate::store::FlagStore;
use anyhow::{anyhow, Error};
use async_channel::Receiver;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Regenerates the variants for one descriptor.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &JobDescriptor) -> Result<(), Error>;
}

/// Runs an external program per job, with the descriptor as JSON in `IMGQ_JOB`.
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    program: String,
    args: Vec<String>,
}

impl CommandProcessor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandProcessor {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn process(&self, job: &JobDescriptor) -> Result<(), Error> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .env("IMGQ_JOB", job.to_json()?)
            .env("IMGQ_OWNER_TYPE", &job.owner_type)
            .env("IMGQ_OWNER_ID", job.owner_id.to_string())
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.program, status));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum WorkMessage {
    JobStarted(ClaimedJob),
    JobCompleted(ClaimedJob),
    JobFailed(ClaimedJob, String),
    /// The owner was destroyed after the job was queued.
    JobSkipped(ClaimedJob),
}

pub async fn start<S, P>(
    cancel_token: CancellationToken,
    recv_from_queue: Receiver<ClaimedJob>,
    send_to_server: UnboundedSender<WorkMessage>,
    store: Arc<S>,
    processor: Arc<P>,
) where
    S: FlagStore + ?Sized,
    P: Processor + ?Sized,
{
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Worker Cancelled");
                break;
            },
            job = recv_from_queue.recv() => {
                let job = match job {
                    Err(err) => {
                        debug!(message = "Job channel closed, exiting", error = ?err);
                        break;
                    },
                    Ok(job) => job,
                };
                if send_to_server.send(WorkMessage::JobStarted(job.clone())).is_err() {
                    warn!(job_id = job.id, "Failed to report job start to server");
                }
                let message = handle(&*store, &*processor, job).await;
                if send_to_server.send(message).is_err() {
                    error!("Server is gone, worker exiting");
                    break;
                }
            }
        }
    }
    info!("Worker stopped.");
}

#[instrument(skip_all, fields(job_id = job.id, queue = %job.queue, owner_id = job.descriptor.owner_id))]
async fn handle<S, P>(
    store: &S,
    processor: &P,
    job: ClaimedJob,
) -> WorkMessage
where
    S: FlagStore + ?Sized,
    P: Processor + ?Sized,
{
    match store.get(&job.descriptor.owner()).await {
        Ok(None) => {
            debug!("Owner no longer exists, skipping");
            return WorkMessage::JobSkipped(job);
        }
        Ok(Some(_)) => {}
        Err(err) => return WorkMessage::JobFailed(job, err.to_string()),
    }

    match processor.process(&job.descriptor).await {
        Ok(()) => WorkMessage::JobCompleted(job),
        Err(err) => {
            warn!(error = %err, "Processing failed");
            WorkMessage::JobFailed(job, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::memory::MemoryBroker;
    use crate::owner::OwnerKey;
    use crate::queue::QueueClient;

    struct Succeed;

    #[async_trait]
    impl Processor for Succeed {
        async fn process(&self, _job: &JobDescriptor) -> Result<(), Error> {
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Processor for Fail {
        async fn process(&self, _job: &JobDescriptor) -> Result<(), Error> {
            Err(anyhow!("resize crashed"))
        }
    }

    #[tokio::test]
    async fn skips_jobs_for_destroyed_owners() {
        let broker = MemoryBroker::new();
        broker
            .push("images", &JobDescriptor::new(&OwnerKey::new("DelayedImage", 9), None))
            .await
            .unwrap();
        let job = broker.pop("images").await.unwrap().unwrap();

        let message = handle(&broker, &Succeed, job.clone()).await;

        assert!(matches!(message, WorkMessage::JobSkipped(skipped) if skipped == job));
    }

    #[tokio::test]
    async fn completes_jobs_for_live_owners() {
        let broker = MemoryBroker::new();
        let owner = OwnerKey::new("DelayedImage", 9);
        broker
            .push_flagged("images", &JobDescriptor::new(&owner, None))
            .await
            .unwrap();
        let job = broker.pop("images").await.unwrap().unwrap();

        let message = handle(&broker, &Succeed, job).await;

        assert!(
            matches!(message, WorkMessage::JobCompleted(done) if done.descriptor.belongs_to(&owner))
        );
    }

    #[tokio::test]
    async fn reports_processor_errors() {
        let broker = MemoryBroker::new();
        let owner = OwnerKey::new("DelayedImage", 9);
        broker
            .push_flagged("images", &JobDescriptor::new(&owner, None))
            .await
            .unwrap();
        let job = broker.pop("images").await.unwrap().unwrap();

        let message = handle(&broker, &Fail, job).await;

        assert!(matches!(message, WorkMessage::JobFailed(_, reason) if reason == "resize crashed"));
    }

    #[tokio::test]
    async fn exits_when_server_is_gone() {
        let broker = Arc::new(MemoryBroker::new());
        let owner = OwnerKey::new("DelayedImage", 9);
        broker
            .push_flagged("images", &JobDescriptor::new(&owner, None))
            .await
            .unwrap();
        let job = broker.pop("images").await.unwrap().unwrap();

        let (send_to_worker, recv_from_queue) = async_channel::bounded(1);
        let (send_to_server, recv_from_worker) = tokio::sync::mpsc::unbounded_channel();
        drop(recv_from_worker);
        send_to_worker.send(job).await.unwrap();

        let worker = start(
            CancellationToken::new(),
            recv_from_queue,
            send_to_server,
            broker,
            Arc::new(Succeed),
        );
        tokio::time::timeout(std::time::Duration::from_secs(5), worker)
            .await
            .unwrap();
    }
}
