//! Learning insights for an upcoming phase.
//!
//! Combines persisted correlations ending at a phase with the learning
//! index and the performance ledger to produce rule-based optimization
//! suggestions and a confidence score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::learning::LearningIndex;
use crate::ledger::PerformanceLedger;
use crate::types::{ContentMap, Correlation};

/// Mean validated improvement (percent) required before canned suggestions apply.
pub const VALIDATED_IMPROVEMENT_THRESHOLD: f64 = 20.0;

/// Mean pair strength at which a correlation is called out explicitly.
const STRONG_PAIR_STRENGTH: f64 = 0.8;

/// Suggestions keyed by well-known phase names.
static PHASE_HINTS: &[(&str, &str)] = &[
    ("analysis", "Cache parsed syntax trees between analysis runs"),
    ("analyze", "Cache parsed syntax trees between analysis runs"),
    ("build", "Enable incremental builds and reuse compiled artifacts"),
    ("test", "Run only the tests affected by changed files"),
    ("lint", "Lint only files changed since the previous run"),
    ("security", "Reuse dependency audit results across runs"),
    ("deploy", "Deploy validated build artifacts instead of rebuilding"),
    ("documentation", "Regenerate documentation only for changed modules"),
    ("docs", "Regenerate documentation only for changed modules"),
    ("report", "Render reports from cached analysis results"),
];

/// A correlation pattern ending at the queried phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInsight {
    pub source_phase: String,
    pub correlation_type: String,
    pub pattern_strength: f64,
    pub metadata: ContentMap,
    pub timestamp: Option<DateTime<Utc>>,
}

/// How an upstream phase's correlation lines up with its measured improvements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCorrelation {
    pub source_phase: String,
    pub mean_strength: f64,
    pub observations: u64,
    pub kind_histogram: BTreeMap<String, u64>,
    /// Mean validated improvement recorded for the source phase
    pub source_mean_improvement: Option<f64>,
}

/// Result of [`UnifiedMemoryModel::learning_insights`](crate::UnifiedMemoryModel::learning_insights).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningInsights {
    pub target_phase: String,
    pub relevant_patterns: Vec<PatternInsight>,
    pub performance_correlations: Vec<PerformanceCorrelation>,
    pub suggested_optimizations: Vec<String>,
    /// Mean pattern strength across pairs ending at the target (0 when none)
    pub confidence: f64,
    /// Sources that could not be read while building the insights
    pub gaps: Vec<String>,
}

/// Assemble insights for `target`.
///
/// `persisted` is `None` when the durable store could not be read; the
/// patterns then fall back to the learning index and a gap is noted.
pub fn build_insights(
    target: &str,
    persisted: Option<Vec<Correlation>>,
    index: &LearningIndex,
    ledger: &PerformanceLedger,
) -> LearningInsights {
    let mut gaps = Vec::new();

    let relevant_patterns: Vec<PatternInsight> = match persisted {
        Some(rows) => rows
            .into_iter()
            .filter(|c| c.target_phase == target)
            .map(|c| PatternInsight {
                source_phase: c.source_phase,
                correlation_type: c.correlation_type,
                pattern_strength: c.strength,
                metadata: c.metadata,
                timestamp: Some(c.timestamp),
            })
            .collect(),
        None => {
            gaps.push("persisted correlations unavailable; patterns derived from the learning index".to_string());
            index
                .pairs_ending_at(target)
                .map(|(source, stats)| PatternInsight {
                    source_phase: source.to_string(),
                    correlation_type: stats.dominant_kind().unwrap_or_default().to_string(),
                    pattern_strength: stats.mean_strength,
                    metadata: ContentMap::new(),
                    timestamp: None,
                })
                .collect()
        }
    };

    let performance_correlations: Vec<PerformanceCorrelation> = index
        .pairs_ending_at(target)
        .map(|(source, stats)| PerformanceCorrelation {
            source_phase: source.to_string(),
            mean_strength: stats.mean_strength,
            observations: stats.observations,
            kind_histogram: stats.kind_histogram.clone(),
            source_mean_improvement: ledger.mean_validated_improvement(Some(source)),
        })
        .collect();

    let confidence = if performance_correlations.is_empty() {
        0.0
    } else {
        performance_correlations
            .iter()
            .map(|p| p.mean_strength)
            .sum::<f64>()
            / performance_correlations.len() as f64
    };

    let suggested_optimizations = suggest_optimizations(
        target,
        &index.kind_histogram_for_target(target),
        &performance_correlations,
        ledger.mean_validated_improvement(None),
    );

    LearningInsights {
        target_phase: target.to_string(),
        relevant_patterns,
        performance_correlations,
        suggested_optimizations,
        confidence,
        gaps,
    }
}

/// Rule-based suggestions for `target`.
pub fn suggest_optimizations(
    target: &str,
    kind_histogram: &BTreeMap<String, u64>,
    upstream: &[PerformanceCorrelation],
    mean_validated_improvement: Option<f64>,
) -> Vec<String> {
    let mut suggestions = Vec::new();
    let sources = upstream
        .iter()
        .map(|p| p.source_phase.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    for kind in kind_histogram.keys() {
        let suggestion = match kind.as_str() {
            "performance" => Some(format!(
                "Carry performance optimizations from {} into {}",
                sources, target
            )),
            "dependency" => Some(format!(
                "Order {} work using dependency signals from {}",
                target, sources
            )),
            "pattern" => Some(format!(
                "Reuse patterns detected upstream when processing {}",
                target
            )),
            "coordination" => Some(format!(
                "Share coordination state with {} to avoid duplicate work",
                target
            )),
            _ => None,
        };
        suggestions.extend(suggestion);
    }

    for pair in upstream
        .iter()
        .filter(|p| p.mean_strength >= STRONG_PAIR_STRENGTH)
    {
        suggestions.push(format!(
            "Prioritize the {} -> {} correlation (strength {:.2})",
            pair.source_phase, target, pair.mean_strength
        ));
    }

    if let Some(mean) = mean_validated_improvement {
        if mean >= VALIDATED_IMPROVEMENT_THRESHOLD {
            suggestions.push(format!(
                "Apply validated optimizations averaging {:.1}% improvement to {}",
                mean, target
            ));
            suggestions.push("Reuse cached artifacts from validated upstream runs".to_string());
        }
    }

    let lowered = target.to_lowercase();
    if let Some((_, hint)) = PHASE_HINTS.iter().find(|(name, _)| *name == lowered) {
        suggestions.push((*hint).to_string());
    }

    let mut seen = std::collections::HashSet::new();
    suggestions.retain(|s| seen.insert(s.clone()));
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PerformanceRecord, ValidationStatus};

    fn index_with(pairs: &[(&str, &str, &str, f64)]) -> (LearningIndex, Vec<Correlation>) {
        let rows: Vec<Correlation> = pairs
            .iter()
            .map(|(s, t, k, v)| Correlation::new(*s, *t, *k, *v).unwrap())
            .collect();
        (LearningIndex::from_correlations(&rows), rows)
    }

    #[test]
    fn test_patterns_from_persisted_rows() {
        let (index, rows) = index_with(&[
            ("build", "test", "performance", 0.85),
            ("test", "deploy", "performance", 0.4),
        ]);
        let ledger = PerformanceLedger::default();

        let insights = build_insights("test", Some(rows), &index, &ledger);

        assert_eq!(insights.relevant_patterns.len(), 1);
        assert_eq!(insights.relevant_patterns[0].source_phase, "build");
        assert_eq!(insights.relevant_patterns[0].pattern_strength, 0.85);
        assert!((insights.confidence - 0.85).abs() < 1e-9);
        assert!(insights.gaps.is_empty());
    }

    #[test]
    fn test_falls_back_to_index_when_store_unavailable() {
        let (index, _) = index_with(&[
            ("build", "test", "performance", 0.6),
            ("build", "test", "performance", 0.8),
        ]);

        let insights = build_insights("test", None, &index, &PerformanceLedger::default());

        assert_eq!(insights.gaps.len(), 1);
        assert_eq!(insights.relevant_patterns.len(), 1);
        assert!((insights.relevant_patterns[0].pattern_strength - 0.7).abs() < 1e-9);
        assert_eq!(insights.relevant_patterns[0].correlation_type, "performance");
    }

    #[test]
    fn test_no_correlations_means_zero_confidence() {
        let insights = build_insights(
            "unknown-phase",
            Some(Vec::new()),
            &LearningIndex::new(),
            &PerformanceLedger::default(),
        );
        assert_eq!(insights.confidence, 0.0);
        assert!(insights.relevant_patterns.is_empty());
        assert!(insights.suggested_optimizations.is_empty());
    }

    #[test]
    fn test_validated_improvement_gates_canned_suggestions() {
        let (index, rows) = index_with(&[("build", "test", "performance", 0.5)]);
        let mut ledger = PerformanceLedger::default();
        let record = PerformanceRecord::new("build", "duration_ms", 100.0, 110.0, ContentMap::new());
        let id = record.id.clone();
        ledger.append(record);

        let before = build_insights("test", Some(rows.clone()), &index, &ledger);
        assert!(!before
            .suggested_optimizations
            .iter()
            .any(|s| s.contains("validated optimizations")));

        // 10% is below the threshold even once validated
        ledger.set_validation_status("build", &id, ValidationStatus::Validated);
        let low = build_insights("test", Some(rows.clone()), &index, &ledger);
        assert!(!low
            .suggested_optimizations
            .iter()
            .any(|s| s.contains("validated optimizations")));

        let strong = PerformanceRecord::new("build", "duration_ms", 100.0, 200.0, ContentMap::new());
        let strong_id = strong.id.clone();
        ledger.append(strong);
        ledger.set_validation_status("build", &strong_id, ValidationStatus::Validated);
        let high = build_insights("test", Some(rows), &index, &ledger);
        assert!(high
            .suggested_optimizations
            .iter()
            .any(|s| s.contains("averaging 55.0%")));
        assert_eq!(
            high.performance_correlations[0].source_mean_improvement,
            Some(55.0)
        );
    }

    #[test]
    fn test_kind_and_phase_hints() {
        let mut histogram = BTreeMap::new();
        histogram.insert("dependency".to_string(), 2);
        histogram.insert("unknown".to_string(), 1);

        let suggestions = suggest_optimizations("Build", &histogram, &[], None);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].starts_with("Order Build work"));
        assert_eq!(
            suggestions[1],
            "Enable incremental builds and reuse compiled artifacts"
        );
    }
}
