//! Aggregated performance report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::PhaseSummary;
use crate::safety::SafetyReport;
use crate::store::StoreStats;
use crate::types::UsageStats;

const MEMORY_PRESSURE_PCT: f64 = 80.0;
const LOW_ACCESS_FRACTION_OF_MEAN: f64 = 0.1;
const LOW_ACCESS_SHARE: f64 = 0.3;
const REVIEW_STRATEGY_BELOW_PCT: f64 = 20.0;
const STANDARDIZE_ABOVE_PCT: f64 = 80.0;

/// Health indicators derived from usage and safety state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub memory_utilization_pct: f64,
    pub entry_utilization_pct: f64,
    pub safety_compliant: bool,
    /// Seconds since the last reclaim cycle, or since startup if none has run
    pub secs_since_last_cleanup: i64,
}

/// Result of [`UnifiedMemoryModel::performance_report`](crate::UnifiedMemoryModel::performance_report).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub safety: SafetyReport,
    pub usage: UsageStats,
    pub phase_performance: BTreeMap<String, PhaseSummary>,
    /// Mean pattern strength as source -> target -> strength
    pub learning_index: BTreeMap<String, BTreeMap<String, f64>>,
    pub system_health: SystemHealth,
    pub optimization_opportunities: Vec<String>,
    pub store: Option<StoreStats>,
    /// Sources that could not be read while building the report
    pub gaps: Vec<String>,
}

pub fn utilization_pct(used: f64, max: f64) -> f64 {
    if max <= 0.0 {
        0.0
    } else {
        used / max * 100.0
    }
}

/// Whether more than 30% of entries sit below 10% of the mean access count.
pub fn mostly_cold(access_counts: &[u64]) -> bool {
    if access_counts.is_empty() {
        return false;
    }
    let mean = access_counts.iter().sum::<u64>() as f64 / access_counts.len() as f64;
    let cutoff = mean * LOW_ACCESS_FRACTION_OF_MEAN;
    let cold = access_counts
        .iter()
        .filter(|&&count| (count as f64) < cutoff)
        .count();
    cold as f64 > access_counts.len() as f64 * LOW_ACCESS_SHARE
}

/// Rule-based optimization opportunities.
pub fn optimization_opportunities(
    memory_utilization_pct: f64,
    access_counts: &[u64],
    mean_validated_improvement: Option<f64>,
) -> Vec<String> {
    let mut opportunities = Vec::new();

    if memory_utilization_pct > MEMORY_PRESSURE_PCT {
        opportunities.push(format!(
            "Memory utilization at {:.1}%: run cleanup to release stale entries",
            memory_utilization_pct
        ));
    }

    if mostly_cold(access_counts) {
        opportunities.push(
            "Many entries are rarely accessed: run cleanup to evict cold entries".to_string(),
        );
    }

    match mean_validated_improvement {
        Some(mean) if mean < REVIEW_STRATEGY_BELOW_PCT => opportunities.push(format!(
            "Mean validated improvement is {:.1}%: review the optimization strategy",
            mean
        )),
        Some(mean) if mean > STANDARDIZE_ABOVE_PCT => opportunities.push(format!(
            "Mean validated improvement is {:.1}%: standardize the successful patterns",
            mean
        )),
        _ => {}
    }

    opportunities
}
