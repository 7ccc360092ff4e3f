//! Data-access traits
//!
//! `JobStore` owns the job table; `RankingStore` owns posts, weight configs, scores and
//! the settings rows. Both are implemented by `PgStore` and `MemoryStore`.

mod job;
mod ranking;

pub use job::JobStore;
pub use ranking::RankingStore;
