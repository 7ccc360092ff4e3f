use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use crate::app::AppState;
use crate::jobs::BackgroundJob;
use crate::operator::SaveWeightsRequest;
use crate::store::models::WeightConfig;

#[derive(Debug, Serialize)]
pub(crate) struct SavedWeights {
    weight_config: WeightConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<BackgroundJob>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateDetails {
    name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplaceWeights {
    weights: BTreeMap<String, f64>,
}

/// Body for activate/recompute. Empty bodies are accepted.
#[derive(Debug, Deserialize)]
pub(crate) struct EnqueueRequest {
    #[serde(default)]
    requested_by: Option<String>,
}

pub(crate) async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<WeightConfig>>, ApiError> {
    Ok(Json(state.operator().list_weight_configs().await?))
}

pub(crate) async fn save(
    State(state): State<AppState>,
    Json(request): Json<SaveWeightsRequest>,
) -> Result<(StatusCode, Json<SavedWeights>), ApiError> {
    let (weight_config, job) = state.operator().save_weights(request).await?;
    Ok((StatusCode::CREATED, Json(SavedWeights { weight_config, job })))
}

pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WeightConfig>, ApiError> {
    Ok(Json(state.operator().weight_config(id).await?))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDetails>,
) -> Result<Json<WeightConfig>, ApiError> {
    let config = state
        .operator()
        .update_weight_config(id, request.name, request.description)
        .await?;
    Ok(Json(config))
}

pub(crate) async fn replace_weights(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReplaceWeights>,
) -> Result<Json<WeightConfig>, ApiError> {
    Ok(Json(
        state.operator().replace_weights(id, request.weights).await?,
    ))
}

pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.operator().delete_weight_config(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn activate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<EnqueueRequest>>,
) -> Result<(StatusCode, Json<BackgroundJob>), ApiError> {
    let requested_by = request.and_then(|Json(request)| request.requested_by);
    let job = state.operator().activate(id, requested_by).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub(crate) async fn recompute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<EnqueueRequest>>,
) -> Result<(StatusCode, Json<BackgroundJob>), ApiError> {
    let requested_by = request.and_then(|Json(request)| request.requested_by);
    let job = state.operator().recompute(id, requested_by).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub(crate) async fn active(
    State(state): State<AppState>,
) -> Result<Json<Option<WeightConfig>>, ApiError> {
    Ok(Json(state.operator().active_weight_config().await?))
}
