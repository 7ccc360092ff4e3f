//! Cooperative stop signal checked by the executor at batch boundaries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::jobs::{JobId, JobStatus};
use crate::store::{JobStore, StoreError};

/// Why a running job stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An operator moved the job to `cancelled`.
    Cancelled,
    /// The worker is shutting down.
    Shutdown,
}

/// The job row's status is the cancellation signal; the shutdown token is checked first.
#[derive(Clone)]
pub struct CancelSignal {
    job_id: JobId,
    jobs: Arc<dyn JobStore>,
    shutdown: CancellationToken,
}

impl CancelSignal {
    pub fn new(job_id: JobId, jobs: Arc<dyn JobStore>, shutdown: CancellationToken) -> Self {
        Self {
            job_id,
            jobs,
            shutdown,
        }
    }

    pub async fn check(&self) -> Result<Option<StopReason>, StoreError> {
        if self.shutdown.is_cancelled() {
            return Ok(Some(StopReason::Shutdown));
        }
        let job = self.jobs.get(self.job_id).await?;
        Ok((job.status != JobStatus::Running).then_some(StopReason::Cancelled))
    }
}
