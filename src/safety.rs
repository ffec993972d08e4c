//! Safety validation of memory bounds.
//!
//! Every write asks the [`SafetyValidator`] whether the projected occupancy
//! fits the configured bounds. Denials are appended to a self-trimming
//! violation log which backs the [`SafetyReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MemoryConfig;

/// Number of recent violations inspected by the growth heuristic and shown in reports.
const RECENT_WINDOW: usize = 10;

/// More than this many bound exceedances in the recent window blocks writes.
const GROWTH_PATTERN_THRESHOLD: usize = 3;

/// Kind of operation being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Write,
    Read,
    Maintenance,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Why a validation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MemoryExceeded,
    EntryLimitExceeded,
    /// Writes refused because recent history is dominated by bound exceedances
    GrowthPattern,
}

impl ViolationKind {
    pub fn is_bound_exceedance(&self) -> bool {
        matches!(self, Self::MemoryExceeded | Self::EntryLimitExceeded)
    }
}

/// A logged denial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub operation: OperationKind,
    pub requested_bytes: u64,
    pub requested_entries: usize,
    pub timestamp: DateTime<Utc>,
}

/// Configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyBounds {
    pub max_bytes: u64,
    pub max_entries: usize,
}

/// Compliance snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub bounds: SafetyBounds,
    /// Violations ever recorded, including trimmed ones
    pub total_violations: u64,
    /// Violations currently held in the log
    pub history_size: usize,
    pub recent_violations: Vec<Violation>,
    pub compliant: bool,
}

/// Enforces the memory and entry-count bounds.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    bounds: SafetyBounds,
    log: Vec<Violation>,
    log_capacity: usize,
    log_trim_to: usize,
    total_violations: u64,
}

impl SafetyValidator {
    pub fn new(bounds: SafetyBounds) -> Self {
        Self {
            bounds,
            log: Vec::new(),
            log_capacity: 100,
            log_trim_to: 50,
            total_violations: 0,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            log_capacity: config.violation_log_capacity,
            log_trim_to: config.violation_log_trim_to,
            ..Self::new(SafetyBounds {
                max_bytes: config.max_memory_bytes(),
                max_entries: config.max_entries,
            })
        }
    }

    pub fn bounds(&self) -> SafetyBounds {
        self.bounds
    }

    /// Decide whether an operation leaving the table at the given occupancy is allowed.
    pub fn validate(
        &mut self,
        requested_bytes: u64,
        requested_entries: usize,
        operation: OperationKind,
    ) -> bool {
        let denial = if requested_bytes > self.bounds.max_bytes {
            Some(ViolationKind::MemoryExceeded)
        } else if requested_entries > self.bounds.max_entries {
            Some(ViolationKind::EntryLimitExceeded)
        } else if operation == OperationKind::Write && self.growth_pattern_detected() {
            Some(ViolationKind::GrowthPattern)
        } else {
            None
        };

        match denial {
            Some(kind) => {
                warn!(
                    ?kind,
                    %operation,
                    requested_bytes,
                    requested_entries,
                    max_bytes = self.bounds.max_bytes,
                    max_entries = self.bounds.max_entries,
                    "Safety validation denied operation"
                );
                self.record(Violation {
                    kind,
                    operation,
                    requested_bytes,
                    requested_entries,
                    timestamp: Utc::now(),
                });
                false
            }
            None => true,
        }
    }

    fn growth_pattern_detected(&self) -> bool {
        self.recent()
            .iter()
            .filter(|v| v.kind.is_bound_exceedance())
            .count()
            > GROWTH_PATTERN_THRESHOLD
    }

    fn recent(&self) -> &[Violation] {
        let start = self.log.len().saturating_sub(RECENT_WINDOW);
        &self.log[start..]
    }

    fn record(&mut self, violation: Violation) {
        self.total_violations += 1;
        self.log.push(violation);
        if self.log.len() > self.log_capacity {
            let excess = self.log.len() - self.log_trim_to;
            self.log.drain(..excess);
        }
    }

    pub fn history_size(&self) -> usize {
        self.log.len()
    }

    pub fn report(&self) -> SafetyReport {
        SafetyReport {
            bounds: self.bounds,
            total_violations: self.total_violations,
            history_size: self.log.len(),
            recent_violations: self.recent().to_vec(),
            compliant: self.total_violations == 0,
        }
    }
}
