//! Batch recompute of final scores for one weight configuration.
//!
//! Scores are written to staging only. The live table and the active pointer are touched
//! solely by the activation cutover at the very end, so a job that stops early (error,
//! cancellation, shutdown) never leaves them half-updated.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activation::ActivationManager;
use crate::error::RankingError;
use crate::jobs::{BackgroundJob, CancelSignal, JobStatus, JobUpdate, StopReason};
use crate::observability::metrics::Metrics;
use crate::ranking::{
    DEFAULT_COLD_START_THRESHOLD, NoveltyConfig, NoveltyModel, TopicFrequencies, final_score,
    is_known_dimension,
};
use crate::store::models::{CutoverReport, ScoredPost, StagedScore, WeightConfig};
use crate::store::{JobStore, RankingStore, StoreError};
use crate::util::retry::{RetryConfig, retry_transient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub batch_size: NonZeroUsize,
    pub retry: RetryConfig,
    pub cold_start_threshold: i64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(250).unwrap_or(NonZeroUsize::MIN),
            retry: RetryConfig::default(),
            cold_start_threshold: DEFAULT_COLD_START_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The job row is already `completed`.
    Completed {
        scored: i64,
        cutover: Option<CutoverReport>,
    },
    /// Stopped at a batch boundary; the job row is left as the stopper set it.
    Stopped { scored: i64, reason: StopReason },
}

/// Bounds the catch-up pass for posts that arrive mid-run; anything later fails cutover.
const MAX_CATCH_UP_BATCHES: usize = 8;

pub struct RecomputeExecutor {
    jobs: Arc<dyn JobStore>,
    ranking: Arc<dyn RankingStore>,
    activation: ActivationManager,
    metrics: Arc<Metrics>,
    settings: ExecutorSettings,
}

/// Weights restricted to known dimensions. `Validation` when nothing usable is left.
fn usable_weights(config: &WeightConfig) -> Result<BTreeMap<String, f64>, RankingError> {
    let mut usable = BTreeMap::new();
    for (dimension, weight) in &config.weights {
        if !is_known_dimension(dimension) {
            warn!(
                weight_config_id = %config.id,
                dimension = %dimension,
                "ignoring weight for unknown scoring dimension"
            );
            continue;
        }
        if !weight.is_finite() || *weight < 0.0 {
            return Err(RankingError::validation(format!(
                "weight config {} has an invalid weight for {dimension}: {weight}",
                config.id
            )));
        }
        usable.insert(dimension.clone(), *weight);
    }
    if !usable.values().any(|weight| *weight > 0.0) {
        return Err(RankingError::validation(format!(
            "weight config {} has no positive weight on a known dimension",
            config.id
        )));
    }
    Ok(usable)
}

impl RecomputeExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ranking: Arc<dyn RankingStore>,
        activation: ActivationManager,
        metrics: Arc<Metrics>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            jobs,
            ranking,
            activation,
            metrics,
            settings,
        }
    }

    /// Runs a claimed (`running`) job to completion or to its first stop signal.
    ///
    /// On success the job row is moved to `completed` here (inside the cutover when the
    /// job activates). Errors leave the job `running` for the dispatcher to fail.
    #[instrument(skip_all, fields(job_id = %job.id, weight_config_id = %job.params.weight_config_id))]
    pub async fn execute(
        &self,
        job: &BackgroundJob,
        signal: &CancelSignal,
    ) -> Result<ExecutionOutcome, RankingError> {
        let params = &job.params;
        let config = match self.ranking.get_weight_config(params.weight_config_id).await {
            Ok(config) => config,
            Err(StoreError::NotFound { id, .. }) => {
                return Err(RankingError::validation(format!(
                    "weight config {id} does not exist"
                )));
            }
            Err(error) => return Err(error.into()),
        };
        let weights = usable_weights(&config)?;

        let novelty_config = match params.novelty_config {
            Some(snapshot) => snapshot,
            None => self.retrying("novelty_config", || self.ranking.novelty_config()).await?,
        };
        novelty_config
            .validate()
            .map_err(|reason| RankingError::validation(format!("novelty config: {reason}")))?;
        let total = self
            .retrying("count_scored_posts", || self.ranking.count_scored_posts())
            .await?;
        let model = self.novelty_model(novelty_config, total).await?;
        self.checkpoint(job.id, 0, Some(total)).await?;
        info!(
            total,
            activate_on_completion = params.activate_on_completion,
            cold_start = model.is_cold_start(),
            "recompute started"
        );

        if let Some(reason) = self.check_stop(signal).await? {
            return Ok(ExecutionOutcome::Stopped { scored: 0, reason });
        }

        let batch_size = self.settings.batch_size.get();
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        let mut cursor: Option<Uuid> = None;
        let mut scored: i64 = 0;

        loop {
            let page = self
                .retrying("fetch_scored_posts", || {
                    self.ranking.fetch_scored_posts(cursor, limit)
                })
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = Some(last.post_id);

            scored += self.stage_page(job, &weights, &model, &page).await?;
            self.checkpoint(job.id, scored, None).await?;
            debug!(progress = scored, total, "batch staged");

            if let Some(reason) = self.check_stop(signal).await? {
                info!(progress = scored, total, reason = ?reason, "recompute stopped at batch boundary");
                return Ok(ExecutionOutcome::Stopped { scored, reason });
            }
            if page.len() < batch_size {
                break;
            }
        }

        // Posts scored upstream while the keyset pass was running.
        let mut caught_up: i64 = 0;
        for _ in 0..MAX_CATCH_UP_BATCHES {
            let page = self
                .retrying("fetch_unstaged_posts", || {
                    self.ranking.fetch_unstaged_posts(config.id, job.id, limit)
                })
                .await?;
            if page.is_empty() {
                break;
            }
            caught_up += self.stage_page(job, &weights, &model, &page).await?;
            if page.len() < batch_size {
                break;
            }
        }
        if caught_up > 0 {
            scored += caught_up;
            let total = self
                .retrying("count_scored_posts", || self.ranking.count_scored_posts())
                .await?;
            self.checkpoint(job.id, scored, Some(total)).await?;
            info!(caught_up, total, "staged posts that arrived during the run");
        }

        self.retrying("mark_has_scores", || self.ranking.mark_has_scores(config.id))
            .await?;

        if let Some(reason) = self.check_stop(signal).await? {
            return Ok(ExecutionOutcome::Stopped { scored, reason });
        }

        let cutover = if params.activate_on_completion {
            match self
                .activation
                .cutover_completing(config.id, job.id, scored)
                .await
            {
                Ok(report) => Some(report),
                Err(RankingError::Conflict(reason)) => {
                    return self.stopped_or_conflict(signal, scored, reason).await;
                }
                Err(error) => return Err(error),
            }
        } else {
            match self
                .jobs
                .transition(
                    job.id,
                    JobStatus::Running,
                    JobStatus::Completed,
                    JobUpdate::progress(scored),
                )
                .await
            {
                Ok(_) => None,
                Err(StoreError::Conflict(reason)) => {
                    return self.stopped_or_conflict(signal, scored, reason).await;
                }
                Err(error) => return Err(RankingError::from_store_for_job(error, job.id)),
            }
        };

        info!(scored, activated = cutover.is_some(), "recompute completed");
        Ok(ExecutionOutcome::Completed { scored, cutover })
    }

    /// A completion CAS lost against a concurrent stop; anything else is a real conflict.
    async fn stopped_or_conflict(
        &self,
        signal: &CancelSignal,
        scored: i64,
        reason: String,
    ) -> Result<ExecutionOutcome, RankingError> {
        match self.check_stop(signal).await? {
            Some(stop) => Ok(ExecutionOutcome::Stopped {
                scored,
                reason: stop,
            }),
            None => Err(RankingError::Conflict(reason)),
        }
    }

    /// Scores one page into staging and returns how many rows were written.
    async fn stage_page(
        &self,
        job: &BackgroundJob,
        weights: &BTreeMap<String, f64>,
        model: &NoveltyModel,
        page: &[ScoredPost],
    ) -> Result<i64, RankingError> {
        let computed_at = Utc::now();
        let rows: Vec<StagedScore> = page
            .iter()
            .map(|post| {
                let multiplier = model.multiplier(&post.categories);
                StagedScore {
                    post_id: post.post_id,
                    weight_config_id: job.params.weight_config_id,
                    job_id: job.id,
                    final_score: final_score(&post.scores, weights, multiplier),
                    novelty_multiplier: multiplier,
                    computed_at,
                }
            })
            .collect();
        self.retrying("write_staged_scores", || {
            self.ranking.write_staged_scores(&rows)
        })
        .await?;

        let written = i64::try_from(rows.len()).unwrap_or(i64::MAX);
        #[allow(clippy::cast_precision_loss)]
        self.metrics.posts_scored.inc_by(written as f64);
        Ok(written)
    }

    async fn checkpoint(
        &self,
        job_id: Uuid,
        progress: i64,
        total: Option<i64>,
    ) -> Result<(), RankingError> {
        self.retrying("record_progress", || {
            self.jobs.record_progress(job_id, progress, total)
        })
        .await?;
        Ok(())
    }

    async fn check_stop(&self, signal: &CancelSignal) -> Result<Option<StopReason>, RankingError> {
        self.retrying("check_cancel", || signal.check()).await
    }

    async fn novelty_model(
        &self,
        config: NoveltyConfig,
        total_scored: i64,
    ) -> Result<NoveltyModel, RankingError> {
        let counts = self
            .retrying("topic_counts", || self.ranking.topic_counts(config.window_days))
            .await?;
        Ok(NoveltyModel::new(
            config,
            TopicFrequencies::new(counts, total_scored),
            self.settings.cold_start_threshold,
        ))
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RankingError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let metrics = Arc::clone(&self.metrics);
        retry_transient(
            &self.settings.retry,
            operation,
            move || metrics.transient_retries.inc(),
            op,
        )
        .await
        .map_err(RankingError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::jobs::{JobFilter, JobId, JobStats, NewJob, RecomputeParams};
    use crate::observability::Telemetry;
    use crate::store::MemoryStore;
    use crate::store::models::{NewWeightConfig, ScoredPost};

    struct Harness {
        store: Arc<MemoryStore>,
        metrics: Arc<Metrics>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                metrics: Telemetry::metrics_only().expect("metrics").metrics(),
            }
        }

        fn executor_with(&self, jobs: Arc<dyn JobStore>, batch_size: usize) -> RecomputeExecutor {
            let ranking: Arc<dyn RankingStore> = self.store.clone();
            RecomputeExecutor::new(
                jobs,
                Arc::clone(&ranking),
                ActivationManager::new(ranking, Arc::clone(&self.metrics)),
                Arc::clone(&self.metrics),
                ExecutorSettings {
                    batch_size: NonZeroUsize::new(batch_size).expect("non-zero"),
                    retry: RetryConfig::new(3, 1, 2),
                    cold_start_threshold: DEFAULT_COLD_START_THRESHOLD,
                },
            )
        }

        fn executor(&self, batch_size: usize) -> RecomputeExecutor {
            self.executor_with(self.store.clone(), batch_size)
        }

        fn seed_posts(&self, count: usize) {
            for i in 0..count {
                self.store.insert_scored_post(ScoredPost {
                    post_id: Uuid::new_v4(),
                    scores: HashMap::from([
                        ("drama".to_string(), (i % 10) as f64),
                        ("absurdity".to_string(), 5.0),
                    ]),
                    categories: vec![],
                    scored_at: Utc::now(),
                });
            }
        }

        async fn weight_config(&self) -> WeightConfig {
            self.store
                .create_weight_config(NewWeightConfig {
                    name: "drama-heavy".to_string(),
                    description: None,
                    weights: BTreeMap::from([
                        ("drama".to_string(), 3.0),
                        ("absurdity".to_string(), 1.0),
                    ]),
                    created_by: None,
                })
                .await
                .unwrap()
        }

        async fn claimed_job(&self, config_id: Uuid, activate: bool) -> BackgroundJob {
            self.store
                .enqueue(NewJob::recompute(
                    RecomputeParams::new(config_id, activate),
                    3,
                    None,
                ))
                .await
                .unwrap();
            self.store.claim_next_pending().await.unwrap().expect("claim")
        }

        fn signal(&self, job: &BackgroundJob) -> CancelSignal {
            CancelSignal::new(job.id, self.store.clone(), CancellationToken::new())
        }
    }

    #[tokio::test]
    async fn stages_every_post_and_completes_without_activation() {
        let h = Harness::new();
        h.seed_posts(7);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, false).await;

        let outcome = h.executor(3).execute(&job, &h.signal(&job)).await.unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                scored: 7,
                cutover: None
            }
        );
        assert_eq!(h.store.staged_scores(config.id).len(), 7);
        let finished = h.store.get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 7);
        assert_eq!(finished.total, Some(7));
        assert!(h.store.get_weight_config(config.id).await.unwrap().has_scores);
        assert_eq!(h.store.active_weight_config_id().await.unwrap(), None);
        assert!(h.store.live_scores(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activation_cuts_over_and_completes_in_one_step() {
        let h = Harness::new();
        h.seed_posts(5);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, true).await;

        let outcome = h.executor(2).execute(&job, &h.signal(&job)).await.unwrap();

        let ExecutionOutcome::Completed {
            scored,
            cutover: Some(report),
        } = outcome
        else {
            panic!("expected activation, got {outcome:?}");
        };
        assert_eq!(scored, 5);
        assert_eq!(report.live_rows, 5);
        assert_eq!(
            h.store.active_weight_config_id().await.unwrap(),
            Some(config.id)
        );
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let h = Harness::new();
        h.seed_posts(4);
        let config = h.weight_config().await;

        let first = h.claimed_job(config.id, false).await;
        h.executor(3).execute(&first, &h.signal(&first)).await.unwrap();
        let before: Vec<(Uuid, f64)> = h
            .store
            .staged_scores(config.id)
            .iter()
            .map(|row| (row.post_id, row.final_score))
            .collect();

        let second = h.claimed_job(config.id, false).await;
        h.executor(3)
            .execute(&second, &h.signal(&second))
            .await
            .unwrap();
        let after: Vec<(Uuid, f64)> = h
            .store
            .staged_scores(config.id)
            .iter()
            .map(|row| (row.post_id, row.final_score))
            .collect();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn scores_use_weighted_mean_times_multiplier() {
        let h = Harness::new();
        let post_id = Uuid::new_v4();
        h.store.insert_scored_post(ScoredPost {
            post_id,
            scores: HashMap::from([
                ("drama".to_string(), 9.0),
                ("absurdity".to_string(), 1.0),
                ("readability".to_string(), 10.0),
            ]),
            categories: vec!["pets".to_string()],
            scored_at: Utc::now(),
        });
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, false).await;

        h.executor(10).execute(&job, &h.signal(&job)).await.unwrap();

        let staged = h.store.staged_scores(config.id);
        // (9*3 + 1*1) / 4 = 7.0; one scored post is a cold start, so the multiplier is 1.0.
        assert!((staged[0].final_score - 7.0).abs() < 1e-9);
        assert!((staged[0].novelty_multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn novelty_snapshot_overrides_live_config() {
        let h = Harness::new();
        for _ in 0..40 {
            h.store.insert_scored_post(ScoredPost {
                post_id: Uuid::new_v4(),
                scores: HashMap::from([("drama".to_string(), 5.0)]),
                categories: vec!["pets".to_string()],
                scored_at: Utc::now(),
            });
        }
        let config = h.weight_config().await;
        let snapshot = NoveltyConfig {
            min_multiplier: 0.5,
            ..NoveltyConfig::default()
        };
        h.store
            .enqueue(NewJob::recompute(
                RecomputeParams::new(config.id, false).with_novelty_snapshot(snapshot),
                3,
                None,
            ))
            .await
            .unwrap();
        let job = h.store.claim_next_pending().await.unwrap().expect("claim");

        h.executor(100).execute(&job, &h.signal(&job)).await.unwrap();

        // 40 posts share "pets": between common (30) and very_common (100).
        let expected = snapshot.multiplier_for_count(40.0);
        let staged = h.store.staged_scores(config.id);
        assert_eq!(staged.len(), 40);
        assert!(staged
            .iter()
            .all(|row| (row.novelty_multiplier - expected).abs() < 1e-12));
        assert!(expected < 1.0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_in_process() {
        let h = Harness::new();
        h.seed_posts(3);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, false).await;
        h.store.inject_transient_failures(2);

        let outcome = h.executor(2).execute(&job, &h.signal(&job)).await.unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Completed { scored: 3, .. }));
        assert!((h.metrics.transient_retries.get() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_escalate() {
        let h = Harness::new();
        h.seed_posts(3);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, true).await;
        h.store.inject_transient_failures(10);

        let error = h
            .executor(2)
            .execute(&job, &h.signal(&job))
            .await
            .unwrap_err();

        assert!(matches!(error, RankingError::Transient(_)));
        assert!(error.is_retryable());
        assert_eq!(h.store.active_weight_config_id().await.unwrap(), None);
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn missing_weight_config_is_a_validation_error() {
        let h = Harness::new();
        let job = h.claimed_job(Uuid::new_v4(), false).await;

        let error = h.executor(2).execute(&job, &h.signal(&job)).await.unwrap_err();

        assert!(matches!(error, RankingError::Validation(_)));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn unknown_dimensions_are_dropped_on_load() {
        let h = Harness::new();
        h.seed_posts(1);
        let config = h
            .store
            .create_weight_config(NewWeightConfig {
                name: "legacy".to_string(),
                description: None,
                weights: BTreeMap::from([("vibes".to_string(), 5.0)]),
                created_by: None,
            })
            .await
            .unwrap();
        let job = h.claimed_job(config.id, false).await;

        let error = h.executor(2).execute(&job, &h.signal(&job)).await.unwrap_err();

        assert!(matches!(error, RankingError::Validation(_)));
    }

    /// What happens when a batch checkpoint (progress > 0) reaches the store.
    enum OnProgress {
        Cancel,
        FailOnce(AtomicBool),
        InsertPostOnce(AtomicBool),
    }

    struct HookedJobs {
        inner: Arc<MemoryStore>,
        on_progress: OnProgress,
    }

    impl HookedJobs {
        fn new(inner: Arc<MemoryStore>, on_progress: OnProgress) -> Arc<Self> {
            Arc::new(Self { inner, on_progress })
        }
    }

    #[async_trait]
    impl JobStore for HookedJobs {
        async fn enqueue(&self, job: NewJob) -> Result<BackgroundJob, StoreError> {
            self.inner.enqueue(job).await
        }

        async fn get(&self, id: JobId) -> Result<BackgroundJob, StoreError> {
            self.inner.get(id).await
        }

        async fn list(&self, filter: &JobFilter) -> Result<Vec<BackgroundJob>, StoreError> {
            self.inner.list(filter).await
        }

        async fn transition(
            &self,
            id: JobId,
            from: JobStatus,
            to: JobStatus,
            update: JobUpdate,
        ) -> Result<BackgroundJob, StoreError> {
            self.inner.transition(id, from, to, update).await
        }

        async fn record_progress(
            &self,
            id: JobId,
            progress: i64,
            total: Option<i64>,
        ) -> Result<bool, StoreError> {
            if progress == 0 {
                return self.inner.record_progress(id, progress, total).await;
            }
            match &self.on_progress {
                OnProgress::FailOnce(failed) if !failed.swap(true, Ordering::SeqCst) => {
                    return Err(StoreError::Transient("pool timed out".to_string()));
                }
                OnProgress::InsertPostOnce(inserted) if !inserted.swap(true, Ordering::SeqCst) => {
                    // Sorts before every cursor, so only a catch-up pass can reach it.
                    self.inner.insert_scored_post(ScoredPost {
                        post_id: Uuid::nil(),
                        scores: HashMap::from([("drama".to_string(), 10.0)]),
                        categories: vec![],
                        scored_at: Utc::now(),
                    });
                }
                _ => {}
            }
            let recorded = self.inner.record_progress(id, progress, total).await?;
            if matches!(self.on_progress, OnProgress::Cancel) {
                self.inner
                    .transition(id, JobStatus::Running, JobStatus::Cancelled, JobUpdate::default())
                    .await?;
            }
            Ok(recorded)
        }

        async fn claim_next_pending(&self) -> Result<Option<BackgroundJob>, StoreError> {
            self.inner.claim_next_pending().await
        }

        async fn stats(&self) -> Result<JobStats, StoreError> {
            self.inner.stats().await
        }

        async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError> {
            self.inner.queue_position(id).await
        }
    }

    #[tokio::test]
    async fn cancellation_stops_at_batch_boundary_and_leaves_live_state() {
        let h = Harness::new();
        h.seed_posts(6);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, true).await;
        let jobs: Arc<dyn JobStore> = HookedJobs::new(h.store.clone(), OnProgress::Cancel);
        let signal = CancelSignal::new(job.id, Arc::clone(&jobs), CancellationToken::new());

        let outcome = h.executor_with(jobs, 2).execute(&job, &signal).await.unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Stopped {
                scored: 2,
                reason: StopReason::Cancelled
            }
        );
        assert_eq!(h.store.get(job.id).await.unwrap().status, JobStatus::Cancelled);
        assert_eq!(h.store.staged_scores(config.id).len(), 2);
        assert!(!h.store.get_weight_config(config.id).await.unwrap().has_scores);
        assert_eq!(h.store.active_weight_config_id().await.unwrap(), None);
        assert!(h.store.live_scores(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_failures_are_retried_in_process() {
        let h = Harness::new();
        h.seed_posts(4);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, false).await;
        let jobs: Arc<dyn JobStore> =
            HookedJobs::new(h.store.clone(), OnProgress::FailOnce(AtomicBool::new(false)));
        let signal = CancelSignal::new(job.id, Arc::clone(&jobs), CancellationToken::new());

        let outcome = h.executor_with(jobs, 2).execute(&job, &signal).await.unwrap();

        assert!(matches!(outcome, ExecutionOutcome::Completed { scored: 4, .. }));
        assert!((h.metrics.transient_retries.get() - 1.0).abs() < f64::EPSILON);
        let finished = h.store.get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 4);
    }

    #[tokio::test]
    async fn posts_arriving_mid_run_are_staged_before_cutover() {
        let h = Harness::new();
        h.seed_posts(6);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, true).await;
        let jobs: Arc<dyn JobStore> = HookedJobs::new(
            h.store.clone(),
            OnProgress::InsertPostOnce(AtomicBool::new(false)),
        );
        let signal = CancelSignal::new(job.id, Arc::clone(&jobs), CancellationToken::new());

        let outcome = h.executor_with(jobs, 2).execute(&job, &signal).await.unwrap();

        let ExecutionOutcome::Completed {
            scored,
            cutover: Some(report),
        } = outcome
        else {
            panic!("expected activation, got {outcome:?}");
        };
        assert_eq!(scored, 7);
        assert_eq!(report.live_rows, 7);
        assert_eq!(
            h.store.active_weight_config_id().await.unwrap(),
            Some(config.id)
        );
        let finished = h.store.get(job.id).await.unwrap();
        assert_eq!(finished.progress, 7);
        assert_eq!(finished.total, Some(7));
    }

    #[tokio::test]
    async fn shutdown_stops_before_first_batch() {
        let h = Harness::new();
        h.seed_posts(4);
        let config = h.weight_config().await;
        let job = h.claimed_job(config.id, false).await;
        let token = CancellationToken::new();
        token.cancel();
        let signal = CancelSignal::new(job.id, h.store.clone(), token);

        let outcome = h.executor(2).execute(&job, &signal).await.unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Stopped {
                scored: 0,
                reason: StopReason::Shutdown
            }
        );
        assert!(h.store.staged_scores(config.id).is_empty());
    }
}
