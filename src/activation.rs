//! Ownership of the active weight configuration.
//!
//! `cutover` is the only path that moves the active pointer, and it does so together with
//! the live score table in one store transaction.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RankingError;
use crate::jobs::JobId;
use crate::observability::metrics::Metrics;
use crate::store::models::{CompletingJob, CutoverReport, CutoverRequest, WeightConfig};
use crate::store::{RankingStore, StoreError};

#[derive(Clone)]
pub struct ActivationManager {
    ranking: Arc<dyn RankingStore>,
    metrics: Arc<Metrics>,
}

impl ActivationManager {
    pub fn new(ranking: Arc<dyn RankingStore>, metrics: Arc<Metrics>) -> Self {
        Self { ranking, metrics }
    }

    /// Makes `weight_config_id` active if its staged scores are complete.
    ///
    /// # Errors
    /// `NotReady` leaves the previous activation untouched.
    pub async fn cutover(&self, weight_config_id: Uuid) -> Result<CutoverReport, RankingError> {
        self.run_cutover(CutoverRequest {
            weight_config_id,
            completing_job: None,
        })
        .await
    }

    /// Same as [`cutover`](Self::cutover), and marks `job_id` completed in the same unit.
    ///
    /// Fails with `Conflict` (and writes nothing) if the job is no longer running.
    pub async fn cutover_completing(
        &self,
        weight_config_id: Uuid,
        job_id: JobId,
        progress: i64,
    ) -> Result<CutoverReport, RankingError> {
        self.run_cutover(CutoverRequest {
            weight_config_id,
            completing_job: Some(CompletingJob { job_id, progress }),
        })
        .await
    }

    async fn run_cutover(&self, request: CutoverRequest) -> Result<CutoverReport, RankingError> {
        match self.ranking.cutover(request).await {
            Ok(report) => {
                self.metrics.cutovers.inc();
                info!(
                    weight_config_id = %report.weight_config_id,
                    previous_weight_config_id = ?report.previous_weight_config_id,
                    live_rows = report.live_rows,
                    "cutover completed"
                );
                Ok(report)
            }
            Err(error @ StoreError::NotReady { .. }) => {
                self.metrics.cutover_rejected.inc();
                warn!(
                    weight_config_id = %request.weight_config_id,
                    error = %error,
                    "cutover rejected, active configuration unchanged"
                );
                Err(error.into())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn active_id(&self) -> Result<Option<Uuid>, RankingError> {
        Ok(self.ranking.active_weight_config_id().await?)
    }

    pub async fn active(&self) -> Result<Option<WeightConfig>, RankingError> {
        match self.ranking.active_weight_config_id().await? {
            Some(id) => Ok(Some(self.ranking.get_weight_config(id).await?)),
            None => Ok(None),
        }
    }

    /// Deletes an inactive, unreferenced config together with its staged scores.
    pub async fn delete(&self, weight_config_id: Uuid) -> Result<(), RankingError> {
        self.ranking.delete_weight_config(weight_config_id).await?;
        info!(weight_config_id = %weight_config_id, "weight config deleted");
        Ok(())
    }
}
