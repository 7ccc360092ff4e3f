//! Prometheus metric handles for the ranking worker.
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Metrics {
    // Counters
    pub jobs_enqueued: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_cancelled: Counter,
    pub jobs_retried: Counter,
    pub posts_scored: Counter,
    pub cutovers: Counter,
    pub cutover_rejected: Counter,
    pub transient_retries: Counter,

    // Histograms
    pub job_duration: Histogram,

    // Gauges
    pub job_running: Gauge,
}

impl Metrics {
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            jobs_enqueued: register_counter_with_registry!(
                "rank_jobs_enqueued_total",
                "Total number of recompute jobs enqueued",
                registry
            )?,
            jobs_completed: register_counter_with_registry!(
                "rank_jobs_completed_total",
                "Total number of recompute jobs completed",
                registry
            )?,
            jobs_failed: register_counter_with_registry!(
                "rank_jobs_failed_total",
                "Total number of recompute jobs that ended in error",
                registry
            )?,
            jobs_cancelled: register_counter_with_registry!(
                "rank_jobs_cancelled_total",
                "Total number of recompute jobs observed as cancelled",
                registry
            )?,
            jobs_retried: register_counter_with_registry!(
                "rank_jobs_retried_total",
                "Total number of retry jobs re-enqueued after a failure",
                registry
            )?,
            posts_scored: register_counter_with_registry!(
                "rank_posts_scored_total",
                "Total number of post scores written to staging",
                registry
            )?,
            cutovers: register_counter_with_registry!(
                "rank_cutovers_total",
                "Total number of successful activation cutovers",
                registry
            )?,
            cutover_rejected: register_counter_with_registry!(
                "rank_cutover_rejected_total",
                "Cutovers rejected because staging was incomplete",
                registry
            )?,
            transient_retries: register_counter_with_registry!(
                "rank_transient_retries_total",
                "In-process retries of transient data errors",
                registry
            )?,
            job_duration: register_histogram_with_registry!(
                "rank_job_duration_seconds",
                "Wall time of a recompute job from claim to finish",
                vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0],
                registry
            )?,
            job_running: register_gauge_with_registry!(
                "rank_job_running",
                "1 while a recompute job is executing",
                registry
            )?,
        })
    }
}
