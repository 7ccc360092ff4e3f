use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::RankingError;

/// `RankingError` rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub(crate) struct ApiError(RankingError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            RankingError::Validation(_) => StatusCode::BAD_REQUEST,
            RankingError::NotFound { .. } => StatusCode::NOT_FOUND,
            RankingError::Conflict(_) | RankingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            RankingError::NotReady { .. } => StatusCode::PRECONDITION_FAILED,
            RankingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            RankingError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match &self.0 {
            RankingError::Validation(_) => "validation",
            RankingError::NotFound { .. } => "not_found",
            RankingError::Conflict(_) => "conflict",
            RankingError::InvalidTransition { .. } => "invalid_transition",
            RankingError::NotReady { .. } => "not_ready",
            RankingError::Transient(_) => "transient",
            RankingError::Fatal(_) => "fatal",
        }
    }
}

impl From<RankingError> for ApiError {
    fn from(error: RankingError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, status = status.as_u16(), "request failed");
        } else {
            warn!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
