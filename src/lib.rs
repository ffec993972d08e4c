//! # phase-memory
//!
//! A bounded, concurrently accessed memory store for multi-phase pipelines
//! (build, test, lint, deploy and so on).
//!
//! ## Core Components
//!
//! - **Entries**: Keyed phase memory with TTL expiry and LRU eviction
//! - **Safety**: Memory and entry-count bounds with a violation log
//! - **Store**: SQLite persistence for correlations and performance records
//! - **Learning**: Per-phase-pair aggregates over observed correlations
//! - **Reclaimer**: Background task for expiry, eviction and retention
//!
//! ## Example
//!
//! ```rust,ignore
//! use phase_memory::{ContentMap, EntryKind, MemoryConfig, PhaseMemoryEntry, UnifiedMemoryModel};
//! use std::sync::Arc;
//!
//! let model = Arc::new(UnifiedMemoryModel::new(MemoryConfig::persistent("~/.phase-memory/memory.db"))?);
//! model.start_reclaimer()?;
//!
//! let entry = PhaseMemoryEntry::new("build", "compile", EntryKind::Artifact)
//!     .with_content("output", "target/release/app");
//! if !model.store_entry(entry) {
//!     // Over capacity: back off and retry later
//! }
//!
//! model.correlate_phases("build", "test", "performance", 0.85, ContentMap::new())?;
//! let insights = model.learning_insights("test");
//!
//! model.shutdown().await;
//! ```

pub mod config;
pub mod entries;
pub mod error;
pub mod insights;
pub mod learning;
pub mod ledger;
pub mod model;
mod properties;
pub mod reclaimer;
pub mod report;
pub mod safety;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use config::MemoryConfig;
pub use error::{Error, Result};
pub use insights::{LearningInsights, PatternInsight, PerformanceCorrelation};
pub use ledger::{PerformanceLedger, PhaseSummary};
pub use model::UnifiedMemoryModel;
pub use reclaimer::{ReclaimOutcome, Reclaimer};
pub use report::{PerformanceReport, SystemHealth};
pub use safety::{OperationKind, SafetyReport, Violation, ViolationKind};
pub use store::{CorrelationStore, StoreStats};
pub use types::{
    ContentMap, Correlation, CorrelationId, EntryKey, EntryKind, PerformanceRecord,
    PhaseMemoryEntry, RecordId, UsageStats, ValidationStatus, Value,
};
