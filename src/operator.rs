//! Operator-facing actions: weight config CRUD, job control and novelty settings.
//!
//! Every action validates before it writes. Activation only ever enqueues a job; the
//! active pointer moves inside that job's cutover.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::info;
use uuid::Uuid;

use crate::activation::ActivationManager;
use crate::error::RankingError;
use crate::jobs::{
    BackgroundJob, JobFilter, JobId, JobStats, JobStatus, JobUpdate, NewJob, RecomputeParams,
};
use crate::observability::metrics::Metrics;
use crate::ranking::{NoveltyConfig, SCORING_DIMENSIONS, is_known_dimension};
use crate::store::models::{LiveScore, NewWeightConfig, WeightConfig};
use crate::store::{JobStore, RankingStore, StoreError};

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_RANKINGS_PAGE: i64 = 500;
const CANCEL_ATTEMPTS: usize = 3;

/// What to enqueue after saving a weight config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUp {
    #[default]
    None,
    Recompute,
    Activate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveWeightsRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub follow_up: FollowUp,
}

/// A job plus how many jobs will be dispatched before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: BackgroundJob,
    pub queue_position: Option<i64>,
}

pub fn validate_name(name: &str) -> Result<(), RankingError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RankingError::validation("name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(RankingError::validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_weights(weights: &BTreeMap<String, f64>) -> Result<(), RankingError> {
    if weights.is_empty() {
        return Err(RankingError::validation("at least one weight is required"));
    }
    for (dimension, weight) in weights {
        if !is_known_dimension(dimension) {
            return Err(RankingError::validation(format!(
                "unknown scoring dimension {dimension:?} (expected one of {})",
                SCORING_DIMENSIONS.join(", ")
            )));
        }
        if !weight.is_finite() || *weight < 0.0 {
            return Err(RankingError::validation(format!(
                "weight for {dimension} must be a finite non-negative number"
            )));
        }
    }
    if !weights.values().any(|weight| *weight > 0.0) {
        return Err(RankingError::validation(
            "at least one weight must be greater than zero",
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct OperatorService {
    jobs: Arc<dyn JobStore>,
    ranking: Arc<dyn RankingStore>,
    activation: ActivationManager,
    metrics: Arc<Metrics>,
    wake: Arc<Notify>,
    max_retries: i32,
}

impl OperatorService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ranking: Arc<dyn RankingStore>,
        activation: ActivationManager,
        metrics: Arc<Metrics>,
        wake: Arc<Notify>,
        max_retries: i32,
    ) -> Self {
        Self {
            jobs,
            ranking,
            activation,
            metrics,
            wake,
            max_retries,
        }
    }

    // Weight configs

    pub async fn save_weights(
        &self,
        request: SaveWeightsRequest,
    ) -> Result<(WeightConfig, Option<BackgroundJob>), RankingError> {
        validate_name(&request.name)?;
        validate_weights(&request.weights)?;

        let config = self
            .ranking
            .create_weight_config(NewWeightConfig {
                name: request.name.trim().to_string(),
                description: request.description,
                weights: request.weights,
                created_by: request.created_by.clone(),
            })
            .await?;
        info!(weight_config_id = %config.id, name = %config.name, "weight config created");

        let job = match request.follow_up {
            FollowUp::None => None,
            FollowUp::Recompute => Some(
                self.enqueue(RecomputeParams::new(config.id, false), request.created_by)
                    .await?,
            ),
            FollowUp::Activate => Some(
                self.enqueue(RecomputeParams::new(config.id, true), request.created_by)
                    .await?,
            ),
        };
        Ok((config, job))
    }

    pub async fn weight_config(&self, id: Uuid) -> Result<WeightConfig, RankingError> {
        Ok(self.ranking.get_weight_config(id).await?)
    }

    pub async fn list_weight_configs(&self) -> Result<Vec<WeightConfig>, RankingError> {
        Ok(self.ranking.list_weight_configs().await?)
    }

    /// Name and description stay editable after scoring.
    pub async fn update_weight_config(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<WeightConfig, RankingError> {
        if let Some(name) = &name {
            validate_name(name)?;
        }
        let name = name.map(|name| name.trim().to_string());
        Ok(self
            .ranking
            .update_weight_config_details(id, name, description)
            .await?)
    }

    /// Only while the config is unscored and no open job references it.
    pub async fn replace_weights(
        &self,
        id: Uuid,
        weights: BTreeMap<String, f64>,
    ) -> Result<WeightConfig, RankingError> {
        validate_weights(&weights)?;
        let config = self.ranking.replace_weights(id, weights).await?;
        info!(weight_config_id = %id, "weights replaced");
        Ok(config)
    }

    pub async fn delete_weight_config(&self, id: Uuid) -> Result<(), RankingError> {
        self.activation.delete(id).await
    }

    pub async fn active_weight_config(&self) -> Result<Option<WeightConfig>, RankingError> {
        self.activation.active().await
    }

    // Jobs

    /// Enqueues a recompute that cuts over on completion.
    pub async fn activate(
        &self,
        weight_config_id: Uuid,
        actor: Option<String>,
    ) -> Result<BackgroundJob, RankingError> {
        self.ranking.get_weight_config(weight_config_id).await?;
        self.enqueue(RecomputeParams::new(weight_config_id, true), actor)
            .await
    }

    pub async fn recompute(
        &self,
        weight_config_id: Uuid,
        actor: Option<String>,
    ) -> Result<BackgroundJob, RankingError> {
        self.ranking.get_weight_config(weight_config_id).await?;
        self.enqueue(RecomputeParams::new(weight_config_id, false), actor)
            .await
    }

    /// Pending jobs cancel immediately; running ones stop at their next batch boundary.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<BackgroundJob, RankingError> {
        let mut last_conflict = String::new();
        for _ in 0..CANCEL_ATTEMPTS {
            let job = self.jobs.get(job_id).await?;
            if job.status.is_terminal() {
                return Err(RankingError::InvalidTransition {
                    job_id,
                    from: job.status,
                    to: JobStatus::Cancelled,
                });
            }
            match self
                .jobs
                .transition(job_id, job.status, JobStatus::Cancelled, JobUpdate::default())
                .await
            {
                Ok(cancelled) => {
                    if job.status == JobStatus::Pending {
                        self.metrics.jobs_cancelled.inc();
                    }
                    info!(job_id = %job_id, from = %job.status, "job cancelled");
                    return Ok(cancelled);
                }
                // Claimed or finished between the read and the write; look again.
                Err(StoreError::Conflict(reason)) => last_conflict = reason,
                Err(error) => return Err(RankingError::from_store_for_job(error, job_id)),
            }
        }
        Err(RankingError::Conflict(last_conflict))
    }

    pub async fn job(&self, job_id: JobId) -> Result<JobView, RankingError> {
        let job = self.jobs.get(job_id).await?;
        let queue_position = if job.status == JobStatus::Pending {
            self.jobs.queue_position(job_id).await?
        } else {
            None
        };
        Ok(JobView {
            job,
            queue_position,
        })
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<BackgroundJob>, RankingError> {
        Ok(self.jobs.list(filter).await?)
    }

    pub async fn job_stats(&self) -> Result<JobStats, RankingError> {
        Ok(self.jobs.stats().await?)
    }

    // Novelty

    pub async fn novelty_config(&self) -> Result<NoveltyConfig, RankingError> {
        Ok(self.ranking.novelty_config().await?)
    }

    /// Persists the config and, when a weight config is active, enqueues a
    /// recompute-and-activate for it with a snapshot of the new settings.
    pub async fn save_novelty_config(
        &self,
        config: NoveltyConfig,
        actor: Option<String>,
    ) -> Result<(NoveltyConfig, Option<BackgroundJob>), RankingError> {
        config.validate().map_err(RankingError::Validation)?;
        self.ranking.save_novelty_config(&config).await?;
        info!(?config, "novelty config saved");

        let job = match self.activation.active_id().await? {
            Some(active) => Some(
                self.enqueue(
                    RecomputeParams::new(active, true).with_novelty_snapshot(config),
                    actor,
                )
                .await?,
            ),
            None => None,
        };
        Ok((config, job))
    }

    // Rankings

    pub async fn live_rankings(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<LiveScore>, RankingError> {
        let limit = limit.unwrap_or(50);
        let offset = offset.unwrap_or(0);
        if !(1..=MAX_RANKINGS_PAGE).contains(&limit) {
            return Err(RankingError::validation(format!(
                "limit must be between 1 and {MAX_RANKINGS_PAGE}"
            )));
        }
        if offset < 0 {
            return Err(RankingError::validation("offset must not be negative"));
        }
        Ok(self.ranking.live_scores(limit, offset).await?)
    }

    async fn enqueue(
        &self,
        params: RecomputeParams,
        actor: Option<String>,
    ) -> Result<BackgroundJob, RankingError> {
        let job = self
            .jobs
            .enqueue(NewJob::recompute(params, self.max_retries, actor))
            .await?;
        self.metrics.jobs_enqueued.inc();
        self.wake.notify_one();
        info!(
            job_id = %job.id,
            weight_config_id = %job.weight_config_id(),
            activate_on_completion = job.params.activate_on_completion,
            "recompute job enqueued"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::observability::Telemetry;
    use crate::store::MemoryStore;

    fn service(store: &Arc<MemoryStore>) -> OperatorService {
        let metrics = Telemetry::metrics_only().expect("metrics").metrics();
        OperatorService::new(
            store.clone(),
            store.clone(),
            ActivationManager::new(store.clone(), Arc::clone(&metrics)),
            metrics,
            Arc::new(Notify::new()),
            3,
        )
    }

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn request(follow_up: FollowUp) -> SaveWeightsRequest {
        SaveWeightsRequest {
            name: "  drama first ".to_string(),
            description: Some("for the weekly episode".to_string()),
            weights: weights(&[("drama", 2.0), ("readability", 0.5)]),
            created_by: Some("host".to_string()),
            follow_up,
        }
    }

    #[rstest]
    #[case::empty(weights(&[]))]
    #[case::unknown_dimension(weights(&[("vibes", 1.0)]))]
    #[case::negative(weights(&[("drama", -1.0)]))]
    #[case::not_finite(weights(&[("drama", f64::NAN)]))]
    #[case::infinite(weights(&[("drama", f64::INFINITY)]))]
    #[case::all_zero(weights(&[("drama", 0.0), ("absurdity", 0.0)]))]
    fn invalid_weights_are_rejected(#[case] weights: BTreeMap<String, f64>) {
        assert!(matches!(
            validate_weights(&weights),
            Err(RankingError::Validation(_))
        ));
    }

    #[rstest]
    #[case::blank("   ".to_string(), false)]
    #[case::normal("Drama first".to_string(), true)]
    #[case::at_limit("x".repeat(MAX_NAME_LEN), true)]
    #[case::too_long("x".repeat(MAX_NAME_LEN + 1), false)]
    fn name_validation(#[case] name: String, #[case] ok: bool) {
        assert_eq!(validate_name(&name).is_ok(), ok);
    }

    #[tokio::test]
    async fn save_weights_with_activation_enqueues_without_touching_pointer() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);

        let (config, job) = service.save_weights(request(FollowUp::Activate)).await.unwrap();

        assert_eq!(config.name, "drama first");
        let job = job.expect("activation job");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.params.activate_on_completion);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.created_by.as_deref(), Some("host"));
        assert_eq!(service.active_weight_config().await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_request_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let mut bad = request(FollowUp::Activate);
        bad.weights = weights(&[("drama", -2.0)]);

        assert!(matches!(
            service.save_weights(bad).await,
            Err(RankingError::Validation(_))
        ));
        assert!(service.list_weight_configs().await.unwrap().is_empty());
        assert_eq!(service.job_stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn activate_unknown_config_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        assert!(matches!(
            service.activate(Uuid::new_v4(), None).await,
            Err(RankingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_pending_is_immediate_and_terminal_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (config, _) = service.save_weights(request(FollowUp::None)).await.unwrap();
        let job = service.recompute(config.id, None).await.unwrap();

        let cancelled = service.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        let error = service.cancel_job(job.id).await.unwrap_err();
        assert!(matches!(
            error,
            RankingError::InvalidTransition {
                from: JobStatus::Cancelled,
                to: JobStatus::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_running_sets_status_for_the_executor_to_observe() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (config, _) = service.save_weights(request(FollowUp::None)).await.unwrap();
        let job = service.recompute(config.id, None).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let cancelled = service.cancel_job(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.started_at.is_some());
    }

    #[tokio::test]
    async fn queue_position_counts_running_and_older_pending() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (config, _) = service.save_weights(request(FollowUp::None)).await.unwrap();
        let running = service.recompute(config.id, None).await.unwrap();
        let second = service.recompute(config.id, None).await.unwrap();
        let third = service.activate(config.id, None).await.unwrap();
        store.claim_next_pending().await.unwrap();

        assert_eq!(service.job(running.id).await.unwrap().queue_position, None);
        assert_eq!(service.job(second.id).await.unwrap().queue_position, Some(1));
        assert_eq!(service.job(third.id).await.unwrap().queue_position, Some(2));

        let stats = service.job_stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.running_job.map(|r| r.id), Some(running.id));
    }

    #[tokio::test]
    async fn weights_freeze_once_referenced_or_scored() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (config, _) = service.save_weights(request(FollowUp::None)).await.unwrap();

        let updated = service
            .replace_weights(config.id, weights(&[("absurdity", 1.0)]))
            .await
            .unwrap();
        assert_eq!(updated.weights, weights(&[("absurdity", 1.0)]));

        let job = service.recompute(config.id, None).await.unwrap();
        assert!(matches!(
            service
                .replace_weights(config.id, weights(&[("drama", 1.0)]))
                .await,
            Err(RankingError::Conflict(_))
        ));
        service.cancel_job(job.id).await.unwrap();

        store.mark_has_scores(config.id).await.unwrap();
        assert!(matches!(
            service
                .replace_weights(config.id, weights(&[("drama", 1.0)]))
                .await,
            Err(RankingError::Conflict(_))
        ));

        let renamed = service
            .update_weight_config(config.id, Some("renamed".to_string()), None)
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.description, config.description);
    }

    #[tokio::test]
    async fn referenced_config_cannot_be_deleted() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (config, job) = service.save_weights(request(FollowUp::Recompute)).await.unwrap();

        assert!(matches!(
            service.delete_weight_config(config.id).await,
            Err(RankingError::Conflict(_))
        ));
        service.cancel_job(job.expect("job").id).await.unwrap();
        service.delete_weight_config(config.id).await.unwrap();
    }

    #[tokio::test]
    async fn novelty_change_without_active_config_only_saves() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let config = NoveltyConfig {
            max_multiplier: 2.0,
            ..NoveltyConfig::default()
        };

        let (saved, job) = service.save_novelty_config(config, None).await.unwrap();

        assert_eq!(saved, config);
        assert!(job.is_none());
        assert_eq!(service.novelty_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn invalid_novelty_config_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let config = NoveltyConfig {
            min_multiplier: 1.2,
            ..NoveltyConfig::default()
        };
        assert!(matches!(
            service.save_novelty_config(config, None).await,
            Err(RankingError::Validation(_))
        ));
        assert_eq!(
            service.novelty_config().await.unwrap(),
            NoveltyConfig::default()
        );
    }

    #[tokio::test]
    async fn rankings_page_bounds_are_validated() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        assert!(service.live_rankings(None, None).await.unwrap().is_empty());
        assert!(service.live_rankings(Some(0), None).await.is_err());
        assert!(service.live_rankings(Some(MAX_RANKINGS_PAGE + 1), None).await.is_err());
        assert!(service.live_rankings(Some(10), Some(-1)).await.is_err());
    }
}
