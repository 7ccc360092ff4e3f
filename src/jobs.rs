//! Recompute job queue: types, single-flight dispatcher and the batch executor.

pub mod cancel;
pub mod dispatcher;
pub mod executor;
pub mod types;

pub use cancel::{CancelSignal, StopReason};
pub use dispatcher::{Dispatcher, DispatcherSettings, JobOutcome};
pub use executor::{ExecutionOutcome, ExecutorSettings, RecomputeExecutor};
pub use types::{
    BackgroundJob, JobFilter, JobId, JobStats, JobStatus, JobType, JobUpdate, NewJob,
    RecomputeParams, RunningJobProgress,
};
