use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use super::error::ApiError;
use crate::app::AppState;
use crate::store::models::LiveScore;

#[derive(Debug, Deserialize)]
pub(crate) struct RankingsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Live scores of the active configuration, best first.
pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<RankingsQuery>,
) -> Result<Json<Vec<LiveScore>>, ApiError> {
    let scores = state
        .operator()
        .live_rankings(query.limit, query.offset)
        .await?;
    Ok(Json(scores))
}
