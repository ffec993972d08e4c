//! Bounded per-phase performance history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{PerformanceRecord, RecordId, ValidationStatus};

/// Records shown in a phase summary.
const RECENT_RECORDS: usize = 5;

/// Per-phase performance summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub total_records: usize,
    pub validated_records: usize,
    /// Mean improvement among validated records (0 when none are validated)
    pub mean_improvement: f64,
    /// Best improvement among validated records
    pub best_improvement: Option<f64>,
    /// Most recent records, newest last
    pub recent: Vec<PerformanceRecord>,
}

/// In-memory performance history, capped per phase.
///
/// When a phase exceeds `capacity` records, only the newest `trim_to`
/// are kept. The durable store still holds the full retention window.
#[derive(Debug, Clone)]
pub struct PerformanceLedger {
    phases: BTreeMap<String, Vec<PerformanceRecord>>,
    capacity: usize,
    trim_to: usize,
}

impl Default for PerformanceLedger {
    fn default() -> Self {
        Self::new(1_000, 500)
    }
}

impl PerformanceLedger {
    pub fn new(capacity: usize, trim_to: usize) -> Self {
        Self {
            phases: BTreeMap::new(),
            capacity,
            trim_to: trim_to.min(capacity),
        }
    }

    /// Append a record. Returns how many old records were dropped.
    pub fn append(&mut self, record: PerformanceRecord) -> usize {
        let phase = record.phase.clone();
        let history = self.phases.entry(phase.clone()).or_default();
        history.push(record);

        if history.len() > self.capacity {
            let dropped = history.len() - self.trim_to;
            history.drain(..dropped);
            debug!(%phase, dropped, "Trimmed performance ledger");
            dropped
        } else {
            0
        }
    }

    pub fn records(&self, phase: &str) -> &[PerformanceRecord] {
        self.phases.get(phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn phases(&self) -> impl Iterator<Item = &str> {
        self.phases.keys().map(String::as_str)
    }

    /// Update a record's validation status. Returns false if it is not in the ledger.
    pub fn set_validation_status(
        &mut self,
        phase: &str,
        id: &RecordId,
        status: ValidationStatus,
    ) -> bool {
        self.phases
            .get_mut(phase)
            .and_then(|records| records.iter_mut().find(|r| &r.id == id))
            .map(|record| record.validation_status = status)
            .is_some()
    }

    /// Validated improvement percentages, across all phases or one.
    pub fn validated_improvements(&self, phase: Option<&str>) -> Vec<f64> {
        let records: Box<dyn Iterator<Item = &PerformanceRecord>> = match phase {
            Some(p) => Box::new(self.records(p).iter()),
            None => Box::new(self.phases.values().flatten()),
        };
        records
            .filter(|r| r.is_validated())
            .map(|r| r.improvement_percentage)
            .collect()
    }

    /// Mean validated improvement, if any record is validated.
    pub fn mean_validated_improvement(&self, phase: Option<&str>) -> Option<f64> {
        let values = self.validated_improvements(phase);
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    pub fn summary(&self, phase: &str) -> PhaseSummary {
        let records = self.records(phase);
        let validated = self.validated_improvements(Some(phase));
        let recent_start = records.len().saturating_sub(RECENT_RECORDS);

        PhaseSummary {
            total_records: records.len(),
            validated_records: validated.len(),
            mean_improvement: self.mean_validated_improvement(Some(phase)).unwrap_or(0.0),
            best_improvement: validated.iter().copied().reduce(f64::max),
            recent: records[recent_start..].to_vec(),
        }
    }

    pub fn summaries(&self) -> BTreeMap<String, PhaseSummary> {
        self.phases
            .keys()
            .map(|phase| (phase.clone(), self.summary(phase)))
            .collect()
    }
}
