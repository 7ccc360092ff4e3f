//! Domain error taxonomy shared by the scheduler, executor and operator actions.

use thiserror::Error;
use uuid::Uuid;

use crate::jobs::{JobId, JobStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RankingError {
    /// Rejected before anything is enqueued or written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// Concurrent mutation or a guarded delete; the caller may retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cutover attempted on incomplete staging. Never retried automatically.
    #[error(
        "weight config {weight_config_id} is not ready for cutover ({staged}/{total} posts staged, has_scores={has_scores})"
    )]
    NotReady {
        weight_config_id: Uuid,
        has_scores: bool,
        staged: i64,
        total: i64,
    },

    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Data-store hiccup that survived in-process retries.
    #[error("transient data error: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl RankingError {
    pub fn validation(message: impl Into<String>) -> Self {
        RankingError::Validation(message.into())
    }

    /// Whether a failed job carrying this error should be re-enqueued.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RankingError::Transient(_) | RankingError::Conflict(_))
    }

    /// Lifts a store error, attributing transition failures to `job_id`.
    #[must_use]
    pub fn from_store_for_job(error: StoreError, job_id: JobId) -> Self {
        match error {
            StoreError::InvalidTransition { from, to } => {
                RankingError::InvalidTransition { job_id, from, to }
            }
            other => other.into(),
        }
    }
}

impl From<StoreError> for RankingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => RankingError::NotFound { entity, id },
            StoreError::Conflict(reason) => RankingError::Conflict(reason),
            StoreError::InvalidTransition { from, to } => RankingError::Fatal(format!(
                "illegal job status transition {from} -> {to}"
            )),
            StoreError::NotReady {
                weight_config_id,
                has_scores,
                staged,
                total,
            } => RankingError::NotReady {
                weight_config_id,
                has_scores,
                staged,
                total,
            },
            StoreError::Transient(reason) => RankingError::Transient(reason),
            StoreError::Corrupt(reason) => RankingError::Fatal(format!("corrupt row: {reason}")),
            StoreError::Database(error) => RankingError::Fatal(error.to_string()),
        }
    }
}
