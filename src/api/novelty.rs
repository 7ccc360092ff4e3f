use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::app::AppState;
use crate::jobs::BackgroundJob;
use crate::ranking::NoveltyConfig;

#[derive(Debug, Deserialize)]
pub(crate) struct SaveNovelty {
    #[serde(flatten)]
    config: NoveltyConfig,
    #[serde(default)]
    requested_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SavedNovelty {
    novelty_config: NoveltyConfig,
    /// Re-activation of the active weight config, if there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<BackgroundJob>,
}

pub(crate) async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<NoveltyConfig>, ApiError> {
    Ok(Json(state.operator().novelty_config().await?))
}

pub(crate) async fn save(
    State(state): State<AppState>,
    Json(request): Json<SaveNovelty>,
) -> Result<Json<SavedNovelty>, ApiError> {
    let (novelty_config, job) = state
        .operator()
        .save_novelty_config(request.config, request.requested_by)
        .await?;
    Ok(Json(SavedNovelty {
        novelty_config,
        job,
    }))
}
