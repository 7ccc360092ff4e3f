//! In-process store backing both traits with one mutex.
//!
//! Used by the test suites and for running the worker without Postgres. Every trait
//! call takes the lock once, so each call is atomic the same way a single SQL
//! transaction is.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::jobs::{
    BackgroundJob, JobFilter, JobId, JobStats, JobStatus, JobUpdate, NewJob, RunningJobProgress,
};
use crate::ranking::NoveltyConfig;
use crate::store::StoreError;
use crate::store::models::{
    CutoverReport, CutoverRequest, LiveScore, NewWeightConfig, ScoredPost, StagedScore,
    WeightConfig,
};
use crate::store::traits::{JobStore, RankingStore};

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order is dispatch order.
    jobs: Vec<BackgroundJob>,
    weight_configs: BTreeMap<Uuid, WeightConfig>,
    novelty_config: Option<NoveltyConfig>,
    active_weight_config_id: Option<Uuid>,
    posts: BTreeMap<Uuid, ScoredPost>,
    staged: HashMap<(Uuid, Uuid), StagedScore>,
    live: HashMap<Uuid, LiveScore>,
    transient_failures: u32,
}

impl MemoryState {
    fn job_mut(&mut self, id: JobId) -> Result<&mut BackgroundJob, StoreError> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(StoreError::NotFound { entity: "job", id })
    }

    fn is_referenced_by_open_job(&self, weight_config_id: Uuid) -> bool {
        self.jobs.iter().any(|job| {
            matches!(job.status, JobStatus::Pending | JobStatus::Running)
                && job.params.weight_config_id == weight_config_id
        })
    }

    fn take_injected_failure(&mut self, operation: &str) -> Result<(), StoreError> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(StoreError::Transient(format!(
                "injected failure during {operation}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds (or replaces) the upstream scores for a post.
    pub fn insert_scored_post(&self, post: ScoredPost) {
        self.state().posts.insert(post.post_id, post);
    }

    /// Makes the next `count` post reads or staging writes fail as transient errors.
    pub fn inject_transient_failures(&self, count: u32) {
        self.state().transient_failures = count;
    }

    #[must_use]
    pub fn staged_scores(&self, weight_config_id: Uuid) -> Vec<StagedScore> {
        let mut rows: Vec<StagedScore> = self
            .state()
            .staged
            .values()
            .filter(|row| row.weight_config_id == weight_config_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.post_id);
        rows
    }
}

fn apply_transition(job: &mut BackgroundJob, to: JobStatus, update: JobUpdate) {
    let now = Utc::now();
    job.status = to;
    match to {
        JobStatus::Running => job.started_at = Some(job.started_at.unwrap_or(now)),
        JobStatus::Completed | JobStatus::Error => job.completed_at = Some(now),
        JobStatus::Cancelled => job.cancelled_at = Some(now),
        JobStatus::Pending => {}
    }
    if let Some(progress) = update.progress {
        job.progress = progress;
    }
    if let Some(total) = update.total {
        job.total = Some(total);
    }
    if let Some(message) = update.error_message {
        job.error_message = Some(message);
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: NewJob) -> Result<BackgroundJob, StoreError> {
        let record = BackgroundJob {
            id: Uuid::now_v7(),
            job_type: job.job_type,
            status: JobStatus::Pending,
            params: job.params,
            progress: 0,
            total: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            error_message: None,
            created_by: job.created_by,
            source_job_id: job.source_job_id,
        };
        self.state().jobs.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: JobId) -> Result<BackgroundJob, StoreError> {
        self.state()
            .jobs
            .iter()
            .find(|job| job.id == id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "job", id })
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<BackgroundJob>, StoreError> {
        let limit = usize::try_from(filter.effective_limit()).unwrap_or(usize::MAX);
        Ok(self
            .state()
            .jobs
            .iter()
            .rev()
            .filter(|job| filter.matches(job))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<BackgroundJob, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }
        let mut state = self.state();
        if to == JobStatus::Running
            && state.jobs.iter().any(|job| job.status == JobStatus::Running)
        {
            return Err(StoreError::Conflict("another job is already running".to_string()));
        }
        let job = state.job_mut(id)?;
        if job.status != from {
            return Err(StoreError::Conflict(format!(
                "job {id} is {} (expected {from})",
                job.status
            )));
        }
        apply_transition(job, to, update);
        Ok(job.clone())
    }

    async fn record_progress(
        &self,
        id: JobId,
        progress: i64,
        total: Option<i64>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.progress = progress;
        if let Some(total) = total {
            job.total = Some(total);
        }
        Ok(true)
    }

    async fn claim_next_pending(&self) -> Result<Option<BackgroundJob>, StoreError> {
        let mut state = self.state();
        if state.jobs.iter().any(|job| job.status == JobStatus::Running) {
            return Ok(None);
        }
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Pending)
        else {
            return Ok(None);
        };
        apply_transition(job, JobStatus::Running, JobUpdate::default());
        Ok(Some(job.clone()))
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let state = self.state();
        let mut stats = JobStats::default();
        for job in &state.jobs {
            stats.record(job.status, 1);
            if job.status == JobStatus::Running {
                stats.running_job = Some(RunningJobProgress {
                    id: job.id,
                    progress: job.progress,
                    total: job.total,
                });
            }
        }
        Ok(stats)
    }

    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError> {
        let state = self.state();
        let Some(index) = state.jobs.iter().position(|job| job.id == id) else {
            return Err(StoreError::NotFound { entity: "job", id });
        };
        if state.jobs[index].status != JobStatus::Pending {
            return Ok(None);
        }
        let running = state
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Running)
            .count();
        let ahead = state.jobs[..index]
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .count();
        Ok(Some(i64::try_from(running + ahead).unwrap_or(i64::MAX)))
    }
}

#[async_trait]
impl RankingStore for MemoryStore {
    async fn create_weight_config(
        &self,
        config: NewWeightConfig,
    ) -> Result<WeightConfig, StoreError> {
        let record = WeightConfig {
            id: Uuid::now_v7(),
            name: config.name,
            description: config.description,
            weights: config.weights,
            created_at: Utc::now(),
            created_by: config.created_by,
            has_scores: false,
        };
        self.state()
            .weight_configs
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_weight_config(&self, id: Uuid) -> Result<WeightConfig, StoreError> {
        self.state()
            .weight_configs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "weight config",
                id,
            })
    }

    async fn list_weight_configs(&self) -> Result<Vec<WeightConfig>, StoreError> {
        let mut configs: Vec<WeightConfig> =
            self.state().weight_configs.values().cloned().collect();
        configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(configs)
    }

    async fn update_weight_config_details(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<WeightConfig, StoreError> {
        let mut state = self.state();
        let config = state
            .weight_configs
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "weight config",
                id,
            })?;
        if let Some(name) = name {
            config.name = name;
        }
        if description.is_some() {
            config.description = description;
        }
        Ok(config.clone())
    }

    async fn replace_weights(
        &self,
        id: Uuid,
        weights: BTreeMap<String, f64>,
    ) -> Result<WeightConfig, StoreError> {
        let mut state = self.state();
        let referenced = state.is_referenced_by_open_job(id);
        let config = state
            .weight_configs
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "weight config",
                id,
            })?;
        if config.has_scores {
            return Err(StoreError::Conflict(format!(
                "weight config {id} already has scores"
            )));
        }
        if referenced {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is referenced by a pending or running job"
            )));
        }
        config.weights = weights;
        Ok(config.clone())
    }

    async fn mark_has_scores(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        let config = state
            .weight_configs
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "weight config",
                id,
            })?;
        config.has_scores = true;
        Ok(())
    }

    async fn delete_weight_config(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.weight_configs.contains_key(&id) {
            return Err(StoreError::NotFound {
                entity: "weight config",
                id,
            });
        }
        if state.active_weight_config_id == Some(id) {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is the active configuration"
            )));
        }
        if state.is_referenced_by_open_job(id) {
            return Err(StoreError::Conflict(format!(
                "weight config {id} is referenced by a pending or running job"
            )));
        }
        state.weight_configs.remove(&id);
        state.staged.retain(|(_, config_id), _| *config_id != id);
        Ok(())
    }

    async fn novelty_config(&self) -> Result<NoveltyConfig, StoreError> {
        Ok(self.state().novelty_config.unwrap_or_default())
    }

    async fn save_novelty_config(&self, config: &NoveltyConfig) -> Result<(), StoreError> {
        self.state().novelty_config = Some(*config);
        Ok(())
    }

    async fn active_weight_config_id(&self) -> Result<Option<Uuid>, StoreError> {
        Ok(self.state().active_weight_config_id)
    }

    async fn count_scored_posts(&self) -> Result<i64, StoreError> {
        Ok(i64::try_from(self.state().posts.len()).unwrap_or(i64::MAX))
    }

    async fn fetch_scored_posts(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError> {
        let mut state = self.state();
        state.take_injected_failure("fetch_scored_posts")?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let page = match after {
            Some(cursor) => state
                .posts
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, post)| post.clone())
                .collect(),
            None => state.posts.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }

    async fn fetch_unstaged_posts(
        &self,
        weight_config_id: Uuid,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError> {
        let mut state = self.state();
        state.take_injected_failure("fetch_unstaged_posts")?;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .posts
            .values()
            .filter(|post| {
                state
                    .staged
                    .get(&(post.post_id, weight_config_id))
                    .is_none_or(|row| row.job_id != job_id)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn topic_counts(&self, window_days: i32) -> Result<HashMap<String, i64>, StoreError> {
        let since = Utc::now() - Duration::days(i64::from(window_days));
        let state = self.state();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for post in state.posts.values().filter(|post| post.scored_at >= since) {
            let unique: BTreeSet<&String> = post.categories.iter().collect();
            for category in unique {
                *counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn write_staged_scores(&self, scores: &[StagedScore]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.take_injected_failure("write_staged_scores")?;
        for score in scores {
            state
                .staged
                .insert((score.post_id, score.weight_config_id), score.clone());
        }
        Ok(())
    }

    async fn cutover(&self, request: CutoverRequest) -> Result<CutoverReport, StoreError> {
        let CutoverRequest {
            weight_config_id,
            completing_job,
        } = request;
        let mut state = self.state();

        let has_scores = state
            .weight_configs
            .get(&weight_config_id)
            .map(|config| config.has_scores)
            .ok_or(StoreError::NotFound {
                entity: "weight config",
                id: weight_config_id,
            })?;

        if let Some(completing) = completing_job {
            let job = state.job_mut(completing.job_id)?;
            if job.status != JobStatus::Running {
                return Err(StoreError::Conflict(format!(
                    "job {} is {} (expected running)",
                    completing.job_id, job.status
                )));
            }
        }

        let rows: Vec<LiveScore> = state
            .staged
            .values()
            .filter(|row| {
                row.weight_config_id == weight_config_id && state.posts.contains_key(&row.post_id)
            })
            .map(LiveScore::from)
            .collect();
        let staged = i64::try_from(rows.len()).unwrap_or(i64::MAX);
        let total = i64::try_from(state.posts.len()).unwrap_or(i64::MAX);
        if !has_scores || staged != total {
            return Err(StoreError::NotReady {
                weight_config_id,
                has_scores,
                staged,
                total,
            });
        }

        state.live = rows.into_iter().map(|row| (row.post_id, row)).collect();
        let previous = state.active_weight_config_id.replace(weight_config_id);
        if let Some(completing) = completing_job {
            let job = state.job_mut(completing.job_id)?;
            apply_transition(
                job,
                JobStatus::Completed,
                JobUpdate::progress(completing.progress),
            );
        }

        Ok(CutoverReport {
            weight_config_id,
            previous_weight_config_id: previous,
            live_rows: staged,
        })
    }

    async fn live_scores(&self, limit: i64, offset: i64) -> Result<Vec<LiveScore>, StoreError> {
        let state = self.state();
        let mut rows: Vec<LiveScore> = state.live.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}
