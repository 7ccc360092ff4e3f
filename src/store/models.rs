use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::JobId;

/// Named set of per-dimension weights. Weights are frozen once scores exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub weights: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub has_scores: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWeightConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Raw LLM output for one post, produced upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPost {
    pub post_id: Uuid,
    pub scores: HashMap<String, f64>,
    pub categories: Vec<String>,
    pub scored_at: DateTime<Utc>,
}

/// A computed score in the staging area, keyed by `(post_id, weight_config_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedScore {
    pub post_id: Uuid,
    pub weight_config_id: Uuid,
    pub job_id: JobId,
    pub final_score: f64,
    pub novelty_multiplier: f64,
    pub computed_at: DateTime<Utc>,
}

/// A row of the queryable live table. Only the active config has live rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveScore {
    pub post_id: Uuid,
    pub weight_config_id: Uuid,
    pub final_score: f64,
    pub novelty_multiplier: f64,
    pub computed_at: DateTime<Utc>,
}

impl From<&StagedScore> for LiveScore {
    fn from(staged: &StagedScore) -> Self {
        Self {
            post_id: staged.post_id,
            weight_config_id: staged.weight_config_id,
            final_score: staged.final_score,
            novelty_multiplier: staged.novelty_multiplier,
            computed_at: staged.computed_at,
        }
    }
}

/// Job completion folded into the cutover's atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletingJob {
    pub job_id: JobId,
    pub progress: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoverRequest {
    pub weight_config_id: Uuid,
    /// When set, the job must still be `running` and is marked `completed` in the same unit.
    pub completing_job: Option<CompletingJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CutoverReport {
    pub weight_config_id: Uuid,
    pub previous_weight_config_id: Option<Uuid>,
    pub live_rows: i64,
}
