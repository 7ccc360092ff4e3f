//! Postgres-backed stores.
//!
//! `PgStore` implements both store traits over one pool. Multi-statement operations
//! (guarded delete, cutover) run in a single transaction.

mod jobs;
mod ranking;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::jobs::{BackgroundJob, JobStatus, JobType, RecomputeParams};
use crate::store::StoreError;
use crate::store::models::{LiveScore, ScoredPost, WeightConfig};

const JOB_COLUMNS: &str = "id, type, status, params, progress, total, created_at, started_at, \
     completed_at, cancelled_at, retry_count, max_retries, error_message, created_by, source_job_id";

const WEIGHT_CONFIG_COLUMNS: &str =
    "id, name, description, weights, created_at, created_by, has_scores";

const NOVELTY_CONFIG_KEY: &str = "novelty_config";
const ACTIVE_WEIGHT_CONFIG_KEY: &str = "active_weight_config_id";

/// Serializes cutovers against each other.
const CUTOVER_LOCK_KEY: i64 = 0x7261_6e6b_6375_7400;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_job(row: &PgRow) -> Result<BackgroundJob, StoreError> {
    let job_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let params: Value = row.try_get("params")?;

    Ok(BackgroundJob {
        id: row.try_get("id")?,
        job_type: JobType::parse(&job_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job type: {job_type}")))?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status: {status}")))?,
        params: serde_json::from_value::<RecomputeParams>(params)?,
        progress: row.try_get("progress")?,
        total: row.try_get("total")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        error_message: row.try_get("error_message")?,
        created_by: row.try_get("created_by")?,
        source_job_id: row.try_get("source_job_id")?,
    })
}

fn row_to_weight_config(row: &PgRow) -> Result<WeightConfig, StoreError> {
    let weights: Value = row.try_get("weights")?;
    Ok(WeightConfig {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        weights: serde_json::from_value::<BTreeMap<String, f64>>(weights)?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
        has_scores: row.try_get("has_scores")?,
    })
}

/// Upstream rows may carry non-numeric values (reasons, nulls); only numbers are kept.
fn numeric_scores(value: &Value) -> HashMap<String, f64> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(dimension, score)| score.as_f64().map(|s| (dimension.clone(), s)))
                .collect()
        })
        .unwrap_or_default()
}

fn row_to_scored_post(row: &PgRow) -> Result<ScoredPost, StoreError> {
    let scores: Value = row.try_get("scores")?;
    let scored_at: DateTime<Utc> = row.try_get("scored_at")?;
    Ok(ScoredPost {
        post_id: row.try_get("post_id")?,
        scores: numeric_scores(&scores),
        categories: row.try_get("categories")?,
        scored_at,
    })
}

fn row_to_live_score(row: &PgRow) -> Result<LiveScore, StoreError> {
    Ok(LiveScore {
        post_id: row.try_get("post_id")?,
        weight_config_id: row.try_get("weight_config_id")?,
        final_score: row.try_get("final_score")?,
        novelty_multiplier: row.try_get("novelty_multiplier")?,
        computed_at: row.try_get("computed_at")?,
    })
}

fn parse_active_pointer(value: Option<Value>) -> Result<Option<Uuid>, StoreError> {
    match value {
        Some(value) => Ok(serde_json::from_value::<Option<Uuid>>(value)?),
        None => Ok(None),
    }
}
