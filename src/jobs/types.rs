use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ranking::NoveltyConfig;

/// Background job ID (`background_jobs.id`)
pub type JobId = Uuid;

/// Status of a background job. Wire values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Error,
        JobStatus::Cancelled,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are sticky.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// `pending → running → {completed | error | cancelled}` and `pending → cancelled`.
    #[must_use]
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running | JobStatus::Cancelled)
                | (
                    JobStatus::Running,
                    JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
                )
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job types understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    RecomputeFinalScores,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::RecomputeFinalScores => "recompute_final_scores",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recompute_final_scores" => Some(JobType::RecomputeFinalScores),
            _ => None,
        }
    }
}

/// `params` payload of a `recompute_final_scores` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecomputeParams {
    pub weight_config_id: Uuid,
    #[serde(default)]
    pub activate_on_completion: bool,
    /// Frozen novelty settings; the live config is read when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novelty_config: Option<NoveltyConfig>,
}

impl RecomputeParams {
    #[must_use]
    pub fn new(weight_config_id: Uuid, activate_on_completion: bool) -> Self {
        Self {
            weight_config_id,
            activate_on_completion,
            novelty_config: None,
        }
    }

    #[must_use]
    pub fn with_novelty_snapshot(mut self, config: NoveltyConfig) -> Self {
        self.novelty_config = Some(config);
        self
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub params: RecomputeParams,
    pub progress: i64,
    pub total: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub created_by: Option<String>,
    pub source_job_id: Option<JobId>,
}

impl BackgroundJob {
    #[must_use]
    pub fn weight_config_id(&self) -> Uuid {
        self.params.weight_config_id
    }

    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// New job to be inserted into the queue
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub params: RecomputeParams,
    pub max_retries: i32,
    pub retry_count: i32,
    pub created_by: Option<String>,
    pub source_job_id: Option<JobId>,
}

impl NewJob {
    #[must_use]
    pub fn recompute(params: RecomputeParams, max_retries: i32, created_by: Option<String>) -> Self {
        Self {
            job_type: JobType::RecomputeFinalScores,
            params,
            max_retries,
            retry_count: 0,
            created_by,
            source_job_id: None,
        }
    }

    /// Fresh pending job that continues a failed one. The failed row is left untouched.
    #[must_use]
    pub fn retry_of(failed: &BackgroundJob) -> Self {
        Self {
            job_type: failed.job_type,
            params: failed.params.clone(),
            max_retries: failed.max_retries,
            retry_count: failed.retry_count + 1,
            created_by: failed.created_by.clone(),
            source_job_id: Some(failed.id),
        }
    }
}

/// Extra columns written alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub progress: Option<i64>,
    pub total: Option<i64>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    #[must_use]
    pub fn progress(progress: i64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Read-side filter for job listings. Newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    pub weight_config_id: Option<Uuid>,
    pub limit: Option<i64>,
}

impl JobFilter {
    #[must_use]
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matches(&self, job: &BackgroundJob) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self
                .weight_config_id
                .is_none_or(|id| id == job.params.weight_config_id)
    }

    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

/// Counts per status plus the running job's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub error: i64,
    pub cancelled: i64,
    pub running_job: Option<RunningJobProgress>,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Error => self.error += count,
            JobStatus::Cancelled => self.cancelled += count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningJobProgress {
    pub id: JobId,
    pub progress: i64,
    pub total: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_only() {
        use JobStatus::{Cancelled, Completed, Error, Pending, Running};

        let legal = [
            (Pending, Running),
            (Pending, Cancelled),
            (Running, Completed),
            (Running, Error),
            (Running, Cancelled),
        ];
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(JobStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn status_wire_values_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
            let json = serde_json::to_value(status).expect("serialize");
            assert_eq!(json, serde_json::Value::String(status.as_str().to_string()));
        }
        assert_eq!(JobStatus::parse("failed"), None);
    }

    #[test]
    fn params_match_wire_shape() {
        let id = Uuid::new_v4();
        let params: RecomputeParams = serde_json::from_value(serde_json::json!({
            "weight_config_id": id,
            "activate_on_completion": true
        }))
        .expect("params parse");
        assert_eq!(params, RecomputeParams::new(id, true));

        let json = serde_json::to_value(&params).expect("serialize");
        assert!(json.get("novelty_config").is_none());

        let minimal: RecomputeParams =
            serde_json::from_value(serde_json::json!({ "weight_config_id": id })).expect("parse");
        assert!(!minimal.activate_on_completion);
    }

    #[test]
    fn retry_job_keeps_lineage() {
        let failed = BackgroundJob {
            id: Uuid::new_v4(),
            job_type: JobType::RecomputeFinalScores,
            status: JobStatus::Error,
            params: RecomputeParams::new(Uuid::new_v4(), true),
            progress: 10,
            total: Some(20),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            retry_count: 1,
            max_retries: 3,
            error_message: Some("boom".to_string()),
            created_by: Some("host".to_string()),
            source_job_id: None,
        };
        let retry = NewJob::retry_of(&failed);
        assert_eq!(retry.retry_count, 2);
        assert_eq!(retry.source_job_id, Some(failed.id));
        assert_eq!(retry.params, failed.params);
    }
}
