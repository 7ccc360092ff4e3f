use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use super::error::ApiError;
use crate::app::AppState;
use crate::error::RankingError;
use crate::jobs::{BackgroundJob, JobFilter, JobStats, JobStatus};
use crate::operator::JobView;

/// `?status=pending,running&weight_config_id=..&limit=..`
#[derive(Debug, Deserialize)]
pub(crate) struct JobsQuery {
    status: Option<String>,
    weight_config_id: Option<Uuid>,
    limit: Option<i64>,
}

impl JobsQuery {
    fn into_filter(self) -> Result<JobFilter, RankingError> {
        let statuses = match self.status.as_deref() {
            None => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| {
                    JobStatus::parse(value).ok_or_else(|| {
                        RankingError::validation(format!("unknown job status {value:?}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(JobFilter {
            statuses,
            weight_config_id: self.weight_config_id,
            limit: self.limit,
        })
    }
}

pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<BackgroundJob>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.operator().list_jobs(&filter).await?))
}

pub(crate) async fn stats(State(state): State<AppState>) -> Result<Json<JobStats>, ApiError> {
    Ok(Json(state.operator().job_stats().await?))
}

pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(state.operator().job(id).await?))
}

pub(crate) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackgroundJob>, ApiError> {
    Ok(Json(state.operator().cancel_job(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(status: Option<&str>) -> JobsQuery {
        JobsQuery {
            status: status.map(str::to_string),
            weight_config_id: None,
            limit: Some(5),
        }
    }

    #[test]
    fn status_list_is_comma_separated() {
        let filter = query(Some("pending, running")).into_filter().unwrap();
        assert_eq!(
            filter.statuses,
            vec![JobStatus::Pending, JobStatus::Running]
        );
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        assert!(matches!(
            query(Some("queued")).into_filter(),
            Err(RankingError::Validation(_))
        ));
    }

    #[test]
    fn missing_status_means_all() {
        assert!(query(None).into_filter().unwrap().statuses.is_empty());
    }
}
