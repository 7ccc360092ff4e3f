//! RankingStore trait - posts, weight configs, staged/live scores and settings

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use uuid::Uuid;

use crate::ranking::NoveltyConfig;
use crate::store::StoreError;
use crate::store::models::{
    CutoverReport, CutoverRequest, LiveScore, NewWeightConfig, ScoredPost, StagedScore,
    WeightConfig,
};

#[async_trait]
pub trait RankingStore: Send + Sync {
    // Weight configs
    async fn create_weight_config(&self, config: NewWeightConfig)
    -> Result<WeightConfig, StoreError>;

    async fn get_weight_config(&self, id: Uuid) -> Result<WeightConfig, StoreError>;

    async fn list_weight_configs(&self) -> Result<Vec<WeightConfig>, StoreError>;

    async fn update_weight_config_details(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<WeightConfig, StoreError>;

    /// `Conflict` once the config has scores or a pending/running job references it.
    async fn replace_weights(
        &self,
        id: Uuid,
        weights: BTreeMap<String, f64>,
    ) -> Result<WeightConfig, StoreError>;

    async fn mark_has_scores(&self, id: Uuid) -> Result<(), StoreError>;

    /// Deletes the config and its staged scores in one unit.
    ///
    /// `Conflict` while it is active or referenced by a pending/running job.
    async fn delete_weight_config(&self, id: Uuid) -> Result<(), StoreError>;

    // Settings
    /// Live novelty config, or the default when none was saved.
    async fn novelty_config(&self) -> Result<NoveltyConfig, StoreError>;

    async fn save_novelty_config(&self, config: &NoveltyConfig) -> Result<(), StoreError>;

    async fn active_weight_config_id(&self) -> Result<Option<Uuid>, StoreError>;

    // Posts
    async fn count_scored_posts(&self) -> Result<i64, StoreError>;

    /// Keyset page ordered by `post_id` ascending.
    async fn fetch_scored_posts(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError>;

    /// Per-category occurrence counts over the trailing `window_days`.
    async fn topic_counts(&self, window_days: i32) -> Result<HashMap<String, i64>, StoreError>;

    /// Posts with no staged row for `weight_config_id` written by `job_id`, by `post_id`.
    async fn fetch_unstaged_posts(
        &self,
        weight_config_id: Uuid,
        job_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ScoredPost>, StoreError>;

    // Scores
    /// Upserts on `(post_id, weight_config_id)`.
    async fn write_staged_scores(&self, scores: &[StagedScore]) -> Result<(), StoreError>;

    /// Verifies staging, replaces the live table and swaps the active pointer atomically.
    ///
    /// `NotReady` with no writes when staging is incomplete.
    async fn cutover(&self, request: CutoverRequest) -> Result<CutoverReport, StoreError>;

    /// Live rows of the active config, best first.
    async fn live_scores(&self, limit: i64, offset: i64) -> Result<Vec<LiveScore>, StoreError>;
}
