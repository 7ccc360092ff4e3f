//! Single-flight FIFO dispatcher.
//!
//! One loop claims the oldest pending job, runs it to the end and records the outcome
//! before claiming the next. The store's atomic claim is what keeps a second dispatcher
//! (or a second process) from running a job concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RankingError;
use crate::jobs::{
    BackgroundJob, CancelSignal, ExecutionOutcome, JobFilter, JobId, JobStatus, JobUpdate, NewJob,
    RecomputeExecutor, StopReason,
};
use crate::observability::metrics::Metrics;
use crate::store::{JobStore, StoreError};

const ORPHANED_JOB_MESSAGE: &str = "worker restarted while job was running";
const SHUTDOWN_MESSAGE: &str = "worker shut down while job was running";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Idle wait between claims when nothing wakes the loop.
    pub poll_interval: Duration,
    /// Pause after a store error on claim.
    pub error_backoff: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            error_backoff: Duration::from_millis(1000),
        }
    }
}

/// Final state of one dispatched job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        job_id: JobId,
        scored: i64,
        activated: bool,
    },
    Cancelled {
        job_id: JobId,
    },
    Failed {
        job_id: JobId,
        error: String,
        /// Fresh pending job that continues this one, when the failure is retryable.
        retry: Option<JobId>,
    },
}

pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    executor: Arc<RecomputeExecutor>,
    metrics: Arc<Metrics>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        executor: Arc<RecomputeExecutor>,
        metrics: Arc<Metrics>,
        wake: Arc<Notify>,
        shutdown: CancellationToken,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            jobs,
            executor,
            metrics,
            wake,
            shutdown,
            settings,
        }
    }

    /// Runs until the shutdown token fires. A job in flight stops at its next batch boundary.
    pub async fn run(self) {
        info!(
            poll_interval_ms = u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "starting recompute dispatcher"
        );

        match self.recover_orphans().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "recovered orphaned running jobs"),
            Err(e) => error!(error = %e, "failed to recover orphaned jobs"),
        }

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let wait = match self.run_once().await {
                // Look for the next job right away.
                Ok(Some(_)) => continue,
                Ok(None) => {
                    debug!("no pending recompute jobs");
                    self.settings.poll_interval
                }
                Err(e) => {
                    error!(error = %e, "failed to claim next job");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                () = sleep(wait) => {}
            }
        }

        info!("recompute dispatcher stopped");
    }

    /// Claims and fully processes at most one job.
    ///
    /// # Errors
    /// Only claim failures surface here; a failing job is recorded on its row instead.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, RankingError> {
        let Some(job) = self.jobs.claim_next_pending().await? else {
            return Ok(None);
        };
        Ok(Some(self.process(job).await))
    }

    /// Moves jobs left `running` by a previous process to `error` and re-enqueues them
    /// under the normal retry policy. Call once before the loop starts.
    pub async fn recover_orphans(&self) -> Result<usize, RankingError> {
        let orphans = self
            .jobs
            .list(&JobFilter::with_status(JobStatus::Running))
            .await?;
        let mut recovered = 0;
        for job in orphans {
            match self
                .jobs
                .transition(
                    job.id,
                    JobStatus::Running,
                    JobStatus::Error,
                    JobUpdate::error(ORPHANED_JOB_MESSAGE),
                )
                .await
            {
                Ok(failed) => {
                    recovered += 1;
                    self.metrics.jobs_failed.inc();
                    warn!(
                        job_id = %failed.id,
                        weight_config_id = %failed.weight_config_id(),
                        retry_count = failed.retry_count,
                        "orphaned job marked as error"
                    );
                    if failed.can_retry() {
                        self.enqueue_retry(&failed).await;
                    }
                }
                Err(StoreError::Conflict(_)) => {
                    debug!(job_id = %job.id, "orphan changed state during recovery");
                }
                Err(e) => return Err(RankingError::from_store_for_job(e, job.id)),
            }
        }
        Ok(recovered)
    }

    async fn process(&self, job: BackgroundJob) -> JobOutcome {
        info!(
            job_id = %job.id,
            weight_config_id = %job.weight_config_id(),
            activate_on_completion = job.params.activate_on_completion,
            retry_count = job.retry_count,
            "recompute job claimed"
        );
        self.metrics.job_running.set(1.0);
        let timer = self.metrics.job_duration.start_timer();

        let signal = CancelSignal::new(job.id, Arc::clone(&self.jobs), self.shutdown.clone());
        let outcome = match self.executor.execute(&job, &signal).await {
            Ok(ExecutionOutcome::Completed { scored, cutover }) => {
                self.metrics.jobs_completed.inc();
                JobOutcome::Completed {
                    job_id: job.id,
                    scored,
                    activated: cutover.is_some(),
                }
            }
            Ok(ExecutionOutcome::Stopped {
                reason: StopReason::Cancelled,
                scored,
            }) => {
                self.metrics.jobs_cancelled.inc();
                info!(job_id = %job.id, progress = scored, "recompute job cancelled");
                JobOutcome::Cancelled { job_id: job.id }
            }
            Ok(ExecutionOutcome::Stopped {
                reason: StopReason::Shutdown,
                ..
            }) => {
                self.fail(&job, RankingError::Transient(SHUTDOWN_MESSAGE.to_string()))
                    .await
            }
            Err(error) => self.fail(&job, error).await,
        };

        timer.observe_duration();
        self.metrics.job_running.set(0.0);
        outcome
    }

    /// Records `running → error` and re-enqueues when the failure is retryable.
    async fn fail(&self, job: &BackgroundJob, failure: RankingError) -> JobOutcome {
        let message = failure.to_string();
        match self
            .jobs
            .transition(
                job.id,
                JobStatus::Running,
                JobStatus::Error,
                JobUpdate::error(message.clone()),
            )
            .await
        {
            Ok(failed) => {
                self.metrics.jobs_failed.inc();
                error!(
                    job_id = %failed.id,
                    weight_config_id = %failed.weight_config_id(),
                    retry_count = failed.retry_count,
                    max_retries = failed.max_retries,
                    retryable = failure.is_retryable(),
                    error = %message,
                    "recompute job failed"
                );
                let retry = if failure.is_retryable() && failed.can_retry() {
                    self.enqueue_retry(&failed).await
                } else {
                    None
                };
                JobOutcome::Failed {
                    job_id: job.id,
                    error: message,
                    retry,
                }
            }
            Err(StoreError::Conflict(_)) => {
                // Cancelled between the last check and the failure write.
                self.metrics.jobs_cancelled.inc();
                info!(job_id = %job.id, error = %message, "job failed after it was cancelled");
                JobOutcome::Cancelled { job_id: job.id }
            }
            Err(store_error) => {
                error!(
                    job_id = %job.id,
                    error = %message,
                    store_error = %store_error,
                    "failed to record job failure"
                );
                JobOutcome::Failed {
                    job_id: job.id,
                    error: message,
                    retry: None,
                }
            }
        }
    }

    async fn enqueue_retry(&self, failed: &BackgroundJob) -> Option<Uuid> {
        match self.jobs.enqueue(NewJob::retry_of(failed)).await {
            Ok(retry) => {
                self.metrics.jobs_enqueued.inc();
                self.metrics.jobs_retried.inc();
                warn!(
                    job_id = %retry.id,
                    source_job_id = %failed.id,
                    retry_count = retry.retry_count,
                    max_retries = retry.max_retries,
                    "recompute job re-enqueued"
                );
                Some(retry.id)
            }
            Err(e) => {
                error!(source_job_id = %failed.id, error = %e, "failed to re-enqueue job");
                None
            }
        }
    }
}
