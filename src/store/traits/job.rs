//! JobStore trait - persisted job queue

use async_trait::async_trait;

use crate::jobs::{BackgroundJob, JobFilter, JobId, JobStats, JobStatus, JobUpdate, NewJob};
use crate::store::StoreError;

/// Persisted queue of `BackgroundJob` rows. Side effects stay inside the job table.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a `pending` job.
    async fn enqueue(&self, job: NewJob) -> Result<BackgroundJob, StoreError>;

    async fn get(&self, id: JobId) -> Result<BackgroundJob, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<BackgroundJob>, StoreError>;

    /// Compare-and-set on the current status.
    ///
    /// Fails with `InvalidTransition` for an illegal edge, `Conflict` when the row is no
    /// longer in `from`, `NotFound` when it does not exist. Timestamps follow `to`.
    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<BackgroundJob, StoreError>;

    /// Writes progress (and total when given) on a `running` job.
    ///
    /// Returns `false` when the job is no longer running.
    async fn record_progress(
        &self,
        id: JobId,
        progress: i64,
        total: Option<i64>,
    ) -> Result<bool, StoreError>;

    /// Atomically moves the oldest `pending` job to `running`, provided none is running.
    async fn claim_next_pending(&self) -> Result<Option<BackgroundJob>, StoreError>;

    async fn stats(&self) -> Result<JobStats, StoreError>;

    /// Jobs dispatched before this one, or `None` unless it is pending.
    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError>;
}
