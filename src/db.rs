use crate::broker::Broker;
use crate::descriptor::JobDescriptor;
use crate::error::{QueueError, StoreError};
use crate::owner::OwnerKey;
use crate::queue::{ClaimedJob, QueueClient};
use crate::store::FlagStore;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Executor, PgConnection};
use std::sync::Arc;
use tracing::{debug, instrument};

/// PostgreSQL-backed queues and processing flags. Both live in the same
/// database as the owning records.
#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<PgPool>,
}

impl DbHandle {
    #[instrument(name = "db.new", skip_all)]
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        (&pool).execute(include_str!("setup.sql")).await?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }
}

async fn insert_job(
    conn: &mut PgConnection,
    queue: &str,
    descriptor: &JobDescriptor,
) -> Result<(), QueueError> {
    let payload = serde_json::to_value(descriptor)?;
    sqlx::query(
        "INSERT INTO imgq_jobs (queue, owner_type, owner_id, payload) \
        VALUES ($1, $2, $3, $4)",
    )
    .bind(queue)
    .bind(&descriptor.owner_type)
    .bind(descriptor.owner_id)
    .bind(payload)
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl QueueClient for DbHandle {
    #[instrument(name = "db.push", skip_all, fields(queue = %queue, owner_id = descriptor.owner_id))]
    async fn push(&self, queue: &str, descriptor: &JobDescriptor) -> Result<(), QueueError> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut *conn, queue, descriptor).await
    }

    #[instrument(name = "db.remove_matching", skip_all, fields(queue = %queue, owner = %owner))]
    async fn remove_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        let result = sqlx::query(
            "DELETE FROM imgq_jobs \
            WHERE queue = $1 AND owner_type = $2 AND owner_id = $3",
        )
        .bind(queue)
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .execute(&*self.pool)
        .await?;

        debug!("Removed {} queued jobs", result.rows_affected());
        Ok(result.rows_affected() as usize)
    }

    async fn pop(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let row: Option<(i64, Json<JobDescriptor>)> = sqlx::query_as(
            "UPDATE imgq_jobs \
                SET status = 'PROCESSING', \
                started_at = now() \
            WHERE id = ( \
                SELECT id FROM imgq_jobs \
                WHERE queue = $1 AND status = 'QUEUED' \
                ORDER BY id ASC \
                LIMIT 1 \
                FOR UPDATE SKIP LOCKED \
            ) \
            RETURNING id, payload",
        )
        .bind(queue)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|(id, Json(descriptor))| ClaimedJob {
            id,
            queue: queue.to_owned(),
            descriptor,
        }))
    }

    #[instrument(name = "db.ack", skip_all, fields(job_id = job.id))]
    async fn ack(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM imgq_jobs WHERE id = $1")
            .bind(job.id)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[instrument(name = "db.release", skip_all, fields(job_id = job.id))]
    async fn release(&self, job: &ClaimedJob) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE imgq_jobs \
                SET status = 'QUEUED', \
                started_at = NULL \
            WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(job.id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    #[instrument(name = "db.release_all", skip_all, fields(queue = %queue))]
    async fn release_all(&self, queue: &str) -> Result<usize, QueueError> {
        let result = sqlx::query(
            "UPDATE imgq_jobs \
                SET status = 'QUEUED', \
                started_at = NULL \
            WHERE queue = $1 AND status = 'PROCESSING'",
        )
        .bind(queue)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn count_matching(&self, queue: &str, owner: &OwnerKey) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM imgq_jobs \
            WHERE queue = $1 AND owner_type = $2 AND owner_id = $3",
        )
        .bind(queue)
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count as usize)
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM imgq_jobs WHERE queue = $1 AND status = 'QUEUED'",
        )
        .bind(queue)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count as usize)
    }
}

#[async_trait]
impl FlagStore for DbHandle {
    async fn get(&self, owner: &OwnerKey) -> Result<Option<bool>, StoreError> {
        Ok(sqlx::query_scalar(
            "SELECT processing FROM imgq_processing \
            WHERE owner_type = $1 AND owner_id = $2",
        )
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .fetch_optional(&*self.pool)
        .await?)
    }

    #[instrument(name = "db.remove_flag", skip_all, fields(owner = %owner))]
    async fn remove(&self, owner: &OwnerKey) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM imgq_processing \
            WHERE owner_type = $1 AND owner_id = $2",
        )
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Broker for DbHandle {
    #[instrument(name = "db.push_flagged", skip_all, fields(queue = %queue, owner_id = descriptor.owner_id))]
    async fn push_flagged(
        &self,
        queue: &str,
        descriptor: &JobDescriptor,
    ) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO imgq_processing (owner_type, owner_id, processing) \
            VALUES ($1, $2, true) \
            ON CONFLICT (owner_type, owner_id) \
            DO UPDATE SET processing = true, updated_at = now()",
        )
        .bind(&descriptor.owner_type)
        .bind(descriptor.owner_id)
        .execute(&mut *tx)
        .await?;

        insert_job(&mut *tx, queue, descriptor).await?;

        tx.commit().await?;
        Ok(())
    }

    /// The flag row is locked before looking for jobs, so a concurrent
    /// `push_flagged` either commits first and its job is seen, or waits and
    /// sets the flag again after this clears it.
    #[instrument(name = "db.finish_if_idle", skip_all, fields(owner = %owner))]
    async fn finish_if_idle(&self, queues: &[&str], owner: &OwnerKey) -> Result<bool, QueueError> {
        let mut tx = self.pool.begin().await?;

        let flag: Option<bool> = sqlx::query_scalar(
            "SELECT processing FROM imgq_processing \
            WHERE owner_type = $1 AND owner_id = $2 \
            FOR UPDATE",
        )
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        if flag.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        let queues: Vec<String> = queues.iter().map(|q| q.to_string()).collect();
        let busy: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM imgq_jobs \
                WHERE queue = ANY($1) AND owner_type = $2 AND owner_id = $3 \
            )",
        )
        .bind(queues)
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .fetch_one(&mut *tx)
        .await?;

        if busy {
            tx.rollback().await?;
            debug!("More work stored, keeping processing flag");
            return Ok(false);
        }

        sqlx::query(
            "UPDATE imgq_processing \
            SET processing = false, updated_at = now() \
            WHERE owner_type = $1 AND owner_id = $2",
        )
        .bind(&owner.owner_type)
        .bind(owner.owner_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}
