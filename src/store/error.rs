use thiserror::Error;
use uuid::Uuid;

use crate::jobs::JobStatus;

/// Errors raised by the data-access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// Row changed underneath the caller; retry or abort.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal job status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error(
        "staged scores for weight config {weight_config_id} are incomplete: has_scores={has_scores}, staged={staged}, posts={total}"
    )]
    NotReady {
        weight_config_id: Uuid,
        has_scores: bool,
        staged: i64,
        total: i64,
    },

    #[error("transient data error: {0}")]
    Transient(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        let code = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                return StoreError::Transient(error.to_string());
            }
            sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
            _ => None,
        };
        match code.as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => StoreError::Transient(error.to_string()),
            // unique_violation
            Some("23505") => StoreError::Conflict(error.to_string()),
            _ => StoreError::Database(error),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Corrupt(error.to_string())
    }
}
