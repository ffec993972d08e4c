//! Durable correlation and performance storage.
//!
//! Correlations and performance records are appended to SQLite and kept
//! independently of the in-memory entry table, so analytics outlive cache
//! turnover. Rows are only removed by the retention purge.
//!
//! ## Example
//!
//! ```rust,ignore
//! use phase_memory::store::CorrelationStore;
//! use phase_memory::Correlation;
//!
//! let store = CorrelationStore::in_memory()?;
//! store.store_correlation(&Correlation::new("build", "test", "performance", 0.8)?)?;
//!
//! let rows = store.correlations_for_phase("test")?;
//! let removed = store.purge_older_than(30)?;
//! ```

mod cache;
mod schema;
mod sqlite;

pub use cache::{CacheStats, CorrelationCache};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use sqlite::{CorrelationStore, PurgeOutcome, StoreStats};
