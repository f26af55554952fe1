use crate::broker::Broker;
use crate::config::DispatchConfig;
use crate::owner::OwnerKey;
use crate::queue::{ClaimedJob, QueueClient};
use crate::worker::{self, Processor, WorkMessage};
use anyhow::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug)]
pub enum WorkResponseMessage {
    JobCompleted(OwnerKey),
    JobFailed(OwnerKey, String),
    JobSkipped(OwnerKey),
    QueueError(Error),
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub config: DispatchConfig,
    pub workers_count: u16,
    pub poll_interval: Duration,
}

/// Claims jobs for a pool of workers, online queue first, and settles the
/// processing flag once an owner has nothing left stored.
///
/// Jobs left claimed by a previous run are put back on their queue before
/// the first claim.
pub async fn serve<B, P>(
    cancel_token: CancellationToken,
    options: ServeOptions,
    broker: Arc<B>,
    processor: Arc<P>,
    send_to_client: mpsc::UnboundedSender<WorkResponseMessage>,
) -> Result<(), Error>
where
    B: Broker + ?Sized + 'static,
    P: Processor + ?Sized + 'static,
{
    let ServeOptions {
        config,
        workers_count,
        poll_interval,
    } = options;

    for name in config.queue_names() {
        let released = broker.release_all(name).await?;
        if released > 0 {
            info!(queue = name, released, "Reset jobs claimed by a previous run");
        }
    }

    let (send_to_server, mut recv_from_worker) = mpsc::unbounded_channel::<WorkMessage>();
    let (send_to_queue, recv_from_queue) =
        async_channel::bounded::<ClaimedJob>(workers_count.max(1) as usize);

    let mut workers = vec![];
    for _ in 0..workers_count {
        let send_to_server = send_to_server.clone();
        let cancel_token = cancel_token.clone();
        let recv_from_queue = recv_from_queue.clone();
        let broker = broker.clone();
        let processor = processor.clone();
        let join_handle = tokio::spawn(
            async move {
                worker::start(cancel_token, recv_from_queue, send_to_server, broker, processor)
                    .await;
            }
            .instrument(info_span!("worker")),
        );
        workers.push(join_handle);
    }
    drop(send_to_server);

    let mut free_workers = workers_count as i64;

    loop {
        while free_workers > 0 {
            match next_job(&*broker, &config).await {
                Ok(Some(job)) => {
                    send_to_queue.send(job).await?;
                    free_workers -= 1;
                }
                Ok(None) => break,
                Err(err) => {
                    if send_to_client
                        .send(WorkResponseMessage::QueueError(err))
                        .is_err()
                    {
                        error!("Failed to send response to client");
                        cancel_token.cancel();
                    }
                    break;
                }
            }
        }

        // Waiting for something to else to happen to continue...
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Server Cancelled");
                break;
            },
            _ = sleep(poll_interval), if free_workers > 0 => {},
            chan_msg = recv_from_worker.recv() => {
                let Some(msg) = chan_msg else {
                    debug!("Worker channel closed unexpectedly, exiting");
                    cancel_token.cancel();
                    break;
                };
                if let WorkMessage::JobStarted(job) = &msg {
                    debug!(message = "Starting job", job_id = job.id, owner = %job.descriptor.owner());
                    continue;
                }
                free_workers += 1;
                let response = settle(&*broker, &config, msg).await;
                if send_to_client.send(response).is_err() {
                    error!("Failed to send response to client");
                    cancel_token.cancel();
                    break;
                }
            }
        }
    }

    send_to_queue.close();
    release_unpicked(&*broker, &recv_from_queue).await;

    // Wait for all workers to complete
    futures::future::join_all(workers)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    // Jobs that finished while shutting down still need to be settled.
    while let Ok(msg) = recv_from_worker.try_recv() {
        if matches!(msg, WorkMessage::JobStarted(_)) {
            continue;
        }
        let response = settle(&*broker, &config, msg).await;
        if let Err(err) = send_to_client.send(response) {
            warn!(response = ?err.0, "Client is gone, dropping response");
        }
    }

    info!("Server stopped.");

    Ok(())
}

async fn next_job<B: QueueClient + ?Sized>(
    broker: &B,
    config: &DispatchConfig,
) -> Result<Option<ClaimedJob>, Error> {
    for name in config.queue_names() {
        if let Some(job) = broker.pop(name).await? {
            return Ok(Some(job));
        }
    }
    Ok(None)
}

/// Hand jobs claimed for the channel but never picked up back to their queue.
async fn release_unpicked<B: QueueClient + ?Sized>(
    broker: &B,
    recv_from_queue: &async_channel::Receiver<ClaimedJob>,
) {
    while let Ok(job) = recv_from_queue.try_recv() {
        if let Err(err) = broker.release(&job).await {
            error!(job_id = job.id, error = %err, "Failed to release job on shutdown");
        }
    }
}

/// Failed jobs settle like completed ones: the flag only tracks outstanding
/// work, and retrying is the processor's business.
async fn settle<B: Broker + ?Sized>(
    broker: &B,
    config: &DispatchConfig,
    msg: WorkMessage,
) -> WorkResponseMessage {
    let (job, response) = match msg {
        WorkMessage::JobCompleted(job) => {
            debug!(message = "Completed job", job_id = job.id);
            let owner = job.descriptor.owner();
            (job, WorkResponseMessage::JobCompleted(owner))
        }
        WorkMessage::JobFailed(job, error_msg) => {
            debug!(message = "Failed job", job_id = job.id, error = %error_msg);
            let owner = job.descriptor.owner();
            (job, WorkResponseMessage::JobFailed(owner, error_msg))
        }
        WorkMessage::JobSkipped(job) => {
            let owner = job.descriptor.owner();
            if let Err(err) = broker.ack(&job).await {
                return WorkResponseMessage::QueueError(err.into());
            }
            return WorkResponseMessage::JobSkipped(owner);
        }
        WorkMessage::JobStarted(job) => {
            return WorkResponseMessage::QueueError(anyhow::anyhow!(
                "unexpected start notice for job {}",
                job.id
            ));
        }
    };

    if let Err(err) = broker.ack(&job).await {
        return WorkResponseMessage::QueueError(err.into());
    }

    let owner = job.descriptor.owner();
    match broker.finish_if_idle(&config.queue_names(), &owner).await {
        Ok(true) => response,
        Ok(false) => {
            debug!(%owner, "More work stored, keeping processing flag");
            response
        }
        Err(err) => WorkResponseMessage::QueueError(err.into()),
    }
}
