pub(crate) mod error;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod metrics;
pub(crate) mod novelty;
pub(crate) mod rankings;
pub(crate) mod weights;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route(
            "/v1/weight-configs",
            get(weights::list).post(weights::save),
        )
        .route("/v1/weight-configs/active", get(weights::active))
        .route(
            "/v1/weight-configs/{id}",
            get(weights::get_one)
                .patch(weights::update)
                .delete(weights::delete),
        )
        .route(
            "/v1/weight-configs/{id}/weights",
            put(weights::replace_weights),
        )
        .route("/v1/weight-configs/{id}/activate", post(weights::activate))
        .route(
            "/v1/weight-configs/{id}/recompute",
            post(weights::recompute),
        )
        .route("/v1/jobs", get(jobs::list))
        .route("/v1/jobs/stats", get(jobs::stats))
        .route("/v1/jobs/{id}", get(jobs::get_one))
        .route("/v1/jobs/{id}/cancel", post(jobs::cancel))
        .route(
            "/v1/novelty-config",
            get(novelty::get_config).put(novelty::save),
        )
        .route("/v1/rankings", get(rankings::list))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
