pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use traits::{JobStore, RankingStore};
