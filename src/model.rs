//! Unified memory model: the coordinator over every component.
//!
//! One [`UnifiedMemoryModel`] is constructed at startup and shared (usually
//! behind an `Arc`) by producers that store entries and record correlations,
//! and by consumers that read insights and reports. Each concern sits behind
//! its own lock so that `get_entry` traffic does not contend with correlation
//! tracking, and no lock is ever held across a durable store call.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::entries::{eviction_batch_size, EntryTable};
use crate::error::{Error, Result};
use crate::insights::{build_insights, LearningInsights};
use crate::learning::LearningIndex;
use crate::ledger::PerformanceLedger;
use crate::reclaimer::{ReclaimOutcome, Reclaimer};
use crate::report::{optimization_opportunities, utilization_pct, PerformanceReport, SystemHealth};
use crate::safety::{OperationKind, SafetyReport, SafetyValidator};
use crate::store::CorrelationStore;
use crate::types::{
    validate_strength, ContentMap, Correlation, CorrelationId, EntryKey, PerformanceRecord,
    PhaseMemoryEntry, RecordId, UsageStats, ValidationStatus,
};

/// Fraction of the memory ceiling above which the reclaimer evicts.
const EVICTION_PRESSURE: f64 = 0.9;

/// Learning index and performance ledger, guarded together.
struct Analytics {
    learning: LearningIndex,
    ledger: PerformanceLedger,
    correlation_count: u64,
}

#[derive(Default)]
struct Housekeeping {
    cleanup_operations: u64,
    last_cleanup: Option<chrono::DateTime<Utc>>,
}

/// Bounded, concurrently accessed cross-phase memory.
pub struct UnifiedMemoryModel {
    config: MemoryConfig,
    entries: Mutex<EntryTable>,
    analytics: Mutex<Analytics>,
    safety: Mutex<SafetyValidator>,
    housekeeping: Mutex<Housekeeping>,
    store: CorrelationStore,
    started_at: chrono::DateTime<Utc>,
    reclaimer: Mutex<Option<Reclaimer>>,
    shut_down: AtomicBool,
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Recovering poisoned memory model lock");
        poisoned.into_inner()
    })
}

impl UnifiedMemoryModel {
    /// Build a model from `config`, opening (or creating) its durable store.
    ///
    /// The learning index is rebuilt from any correlations already persisted.
    pub fn new(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        let store = CorrelationStore::from_config(&config)?;

        let persisted = store.all_correlations().unwrap_or_else(|e| {
            warn!("Failed to load persisted correlations, starting empty: {}", e);
            Vec::new()
        });
        let learning = LearningIndex::from_correlations(&persisted);

        info!(
            max_memory_mb = config.max_memory_mb,
            max_entries = config.max_entries,
            restored_correlations = persisted.len(),
            "Initialized unified memory model"
        );

        Ok(Self {
            entries: Mutex::new(EntryTable::new()),
            analytics: Mutex::new(Analytics {
                learning,
                ledger: PerformanceLedger::new(config.ledger_capacity, config.ledger_trim_to),
                correlation_count: persisted.len() as u64,
            }),
            safety: Mutex::new(SafetyValidator::from_config(&config)),
            housekeeping: Mutex::new(Housekeeping::default()),
            store,
            started_at: Utc::now(),
            reclaimer: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    /// Model with default bounds and an in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::new(MemoryConfig::default())
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.store
    }

    // ==================== Entries ====================

    /// Store or overwrite an entry.
    ///
    /// Returns false when the safety validator rejects the write; the table
    /// is left untouched and the caller should treat it as backpressure.
    pub fn store_entry(&self, entry: PhaseMemoryEntry) -> bool {
        match self.try_store_entry(entry) {
            Ok(()) => true,
            Err(e) if e.is_backpressure() => false,
            Err(e) => {
                warn!("Failed to store phase entry: {}", e);
                false
            }
        }
    }

    /// Like [`store_entry`](Self::store_entry) but reports why a write was refused.
    pub fn try_store_entry(&self, entry: PhaseMemoryEntry) -> Result<()> {
        for correlation in &entry.correlations {
            validate_strength(correlation.strength)?;
        }
        let size = entry.estimated_size()?;
        let key = entry.key();
        let mut correlations = entry.correlations.clone();

        let previous = {
            let mut table = lock(&self.entries);
            let existing = table.size_of(&key);
            let projected_bytes = table.total_bytes() - existing.unwrap_or(0) + size;
            let projected_entries = table.len() + usize::from(existing.is_none());

            let allowed = lock(&self.safety).validate(
                projected_bytes,
                projected_entries,
                OperationKind::Write,
            );
            if !allowed {
                return Err(Error::capacity_exceeded(
                    projected_bytes,
                    projected_entries,
                    format!("store of {} rejected by safety validator", key),
                ));
            }

            table.insert(entry, size)
        };

        // Correlations carried over from the replaced entry are already recorded
        if let Some(previous) = previous {
            correlations.retain(|c| !previous.correlations.iter().any(|p| p.id == c.id));
        }
        for correlation in &correlations {
            self.record_correlation(correlation);
        }

        debug!(%key, size, correlations = correlations.len(), "Stored phase entry");
        Ok(())
    }

    /// Fetch a live entry, counting the access.
    pub fn get_entry(&self, phase: &str, entry_id: &str) -> Option<PhaseMemoryEntry> {
        lock(&self.entries).touch(&EntryKey::new(phase, entry_id), Utc::now())
    }

    /// Remove a live entry. Returns whether it existed.
    pub fn remove_entry(&self, phase: &str, entry_id: &str) -> bool {
        lock(&self.entries)
            .remove(&EntryKey::new(phase, entry_id))
            .is_some()
    }

    /// Snapshot of a phase's live entries; access counters are not touched.
    pub fn entries_for_phase(&self, phase: &str) -> Vec<PhaseMemoryEntry> {
        lock(&self.entries).entries_for_phase(phase)
    }

    /// Snapshot of live entries carrying `tag`.
    pub fn entries_with_tag(&self, tag: &str) -> Vec<PhaseMemoryEntry> {
        lock(&self.entries).entries_with_tag(tag)
    }

    // ==================== Correlations & performance ====================

    /// Persist a correlation between two phases and fold it into the learning index.
    ///
    /// Strengths outside [0, 1] are rejected before any state changes.
    pub fn correlate_phases(
        &self,
        source_phase: &str,
        target_phase: &str,
        correlation_type: &str,
        strength: f64,
        metadata: ContentMap,
    ) -> Result<CorrelationId> {
        let correlation = Correlation::new(source_phase, target_phase, correlation_type, strength)?
            .with_metadata(metadata);
        self.record_correlation(&correlation);
        Ok(correlation.id)
    }

    fn record_correlation(&self, correlation: &Correlation) {
        match self.store.store_correlation(correlation) {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %correlation.id, "Correlation already recorded");
                return;
            }
            Err(e) => warn!(
                source = %correlation.source_phase,
                target = %correlation.target_phase,
                "Failed to persist correlation: {}",
                e
            ),
        }

        let mut analytics = lock(&self.analytics);
        analytics.learning.record(correlation);
        analytics.correlation_count += 1;
    }

    /// Record a before/after measurement for `metric_name` in `phase`.
    pub fn track_performance_improvement(
        &self,
        phase: &str,
        metric_name: &str,
        baseline_value: f64,
        current_value: f64,
        correlation_factors: ContentMap,
    ) -> Result<PerformanceRecord> {
        if !baseline_value.is_finite() || !current_value.is_finite() {
            return Err(Error::invalid_input(format!(
                "metric {} values must be finite (baseline {}, current {})",
                metric_name, baseline_value, current_value
            )));
        }

        let record = PerformanceRecord::new(
            phase,
            metric_name,
            baseline_value,
            current_value,
            correlation_factors,
        );

        if let Err(e) = self.store.store_performance(&record) {
            warn!(%phase, metric = %metric_name, "Failed to persist performance record: {}", e);
        }

        lock(&self.analytics).ledger.append(record.clone());

        debug!(
            %phase,
            metric = %metric_name,
            improvement = record.improvement_percentage,
            "Tracked performance improvement"
        );
        Ok(record)
    }

    /// Transition a performance record's validation status.
    ///
    /// This is the only path out of `Pending`; it is driven by whatever
    /// external validator the integrating system runs. Returns whether the
    /// record was found in the store or the in-memory ledger.
    pub fn set_validation_status(
        &self,
        phase: &str,
        record_id: &RecordId,
        status: ValidationStatus,
    ) -> Result<bool> {
        let persisted = self.store.set_validation_status(record_id, status)?;
        let in_ledger = lock(&self.analytics)
            .ledger
            .set_validation_status(phase, record_id, status);
        Ok(persisted || in_ledger)
    }

    /// Persisted correlations touching `phase`, newest first.
    ///
    /// Read failures are logged and yield an empty list.
    pub fn correlations_for_phase(&self, phase: &str) -> Vec<Correlation> {
        self.store.correlations_for_phase(phase).unwrap_or_else(|e| {
            warn!(%phase, "Failed to read persisted correlations: {}", e);
            Vec::new()
        })
    }

    /// Persisted performance records, optionally for one phase, newest first.
    ///
    /// Read failures are logged and yield an empty list.
    pub fn performance_trends(&self, phase: Option<&str>) -> Vec<PerformanceRecord> {
        self.store.performance_trends(phase).unwrap_or_else(|e| {
            warn!(?phase, "Failed to read performance trends: {}", e);
            Vec::new()
        })
    }

    // ==================== Analysis ====================

    /// Patterns, correlations and suggestions for an upcoming phase.
    pub fn learning_insights(&self, target_phase: &str) -> LearningInsights {
        let persisted = match self.store.correlations_for_phase(target_phase) {
            Ok(rows) => Some(rows),
            Err(e) => {
                warn!(target = %target_phase, "Failed to read persisted correlations: {}", e);
                None
            }
        };

        let analytics = lock(&self.analytics);
        build_insights(target_phase, persisted, &analytics.learning, &analytics.ledger)
    }

    pub fn usage_stats(&self) -> UsageStats {
        let (total_entries, estimated_bytes, phase_distribution) = {
            let table = lock(&self.entries);
            (table.len(), table.total_bytes(), table.phase_distribution())
        };
        let correlation_count = lock(&self.analytics).correlation_count;
        let housekeeping = lock(&self.housekeeping);

        UsageStats {
            total_entries,
            estimated_bytes,
            phase_distribution,
            correlation_count,
            cleanup_operations: housekeeping.cleanup_operations,
            last_cleanup: housekeeping.last_cleanup,
        }
    }

    pub fn safety_report(&self) -> SafetyReport {
        lock(&self.safety).report()
    }

    /// Aggregate safety, usage, performance and learning state.
    pub fn performance_report(&self) -> PerformanceReport {
        let now = Utc::now();
        let mut gaps = Vec::new();

        let safety = self.safety_report();
        let usage = self.usage_stats();
        let access_counts = lock(&self.entries).access_counts();

        let (phase_performance, learning_index, mean_improvement) = {
            let analytics = lock(&self.analytics);
            (
                analytics.ledger.summaries(),
                analytics.learning.strength_map(),
                analytics.ledger.mean_validated_improvement(None),
            )
        };

        let store = match self.store.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Failed to read store statistics: {}", e);
                gaps.push(format!("store statistics unavailable: {}", e));
                None
            }
        };

        let memory_utilization_pct = utilization_pct(
            usage.estimated_bytes as f64,
            self.config.max_memory_bytes() as f64,
        );
        let system_health = SystemHealth {
            memory_utilization_pct,
            entry_utilization_pct: utilization_pct(
                usage.total_entries as f64,
                self.config.max_entries as f64,
            ),
            safety_compliant: safety.compliant,
            secs_since_last_cleanup: (now - usage.last_cleanup.unwrap_or(self.started_at))
                .num_seconds(),
        };

        PerformanceReport {
            generated_at: now,
            optimization_opportunities: optimization_opportunities(
                memory_utilization_pct,
                &access_counts,
                mean_improvement,
            ),
            safety,
            usage,
            phase_performance,
            learning_index,
            system_health,
            store,
            gaps,
        }
    }

    // ==================== Reclamation ====================

    /// Run one reclaim cycle synchronously.
    ///
    /// Expires entries past their TTL, evicts the least recently accessed
    /// 10% when memory is above 90% of the ceiling, then purges store rows
    /// older than the retention window. The entry lock is released before
    /// the purge.
    pub fn run_reclaim_cycle(&self) -> ReclaimOutcome {
        let now = Utc::now();

        let (expired, evicted) = {
            let mut table = lock(&self.entries);
            let expired = table.expire(now);

            let threshold = self.config.max_memory_bytes() as f64 * EVICTION_PRESSURE;
            let evicted = if table.total_bytes() as f64 > threshold {
                let batch = eviction_batch_size(table.len());
                table.evict_lru(batch)
            } else {
                Vec::new()
            };
            (expired.len(), evicted.len())
        };

        if evicted > 0 {
            info!(evicted, "Evicted least recently used entries under memory pressure");
        }
        if expired > 0 {
            debug!(expired, "Expired entries past their TTL");
        }

        let (purged, purge_error) = match self.store.purge_expired(self.config.retention_days) {
            Ok(outcome) => {
                if !outcome.correlations.is_empty() {
                    let mut analytics = lock(&self.analytics);
                    analytics.learning.forget(&outcome.correlations);
                    analytics.correlation_count = analytics
                        .correlation_count
                        .saturating_sub(outcome.correlations.len() as u64);
                }
                (outcome.total(), None)
            }
            Err(e) => {
                warn!("Retention purge failed: {}", e);
                (0, Some(e.to_string()))
            }
        };

        let completed_at = Utc::now();
        {
            let mut housekeeping = lock(&self.housekeeping);
            housekeeping.cleanup_operations += 1;
            housekeeping.last_cleanup = Some(completed_at);
        }

        ReclaimOutcome {
            expired,
            evicted,
            purged,
            purge_error,
            completed_at,
        }
    }

    /// Start the background reclaimer on the current tokio runtime.
    pub fn start_reclaimer(self: &Arc<Self>) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config("reclaimer requires a running tokio runtime"));
        }

        // The shutdown flag is only set while holding the slot
        let mut slot = lock(&self.reclaimer);
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::config("memory model has been shut down"));
        }
        if slot.is_some() {
            return Err(Error::config("reclaimer already running"));
        }
        *slot = Some(Reclaimer::spawn(
            Arc::downgrade(self),
            self.config.cleanup_interval(),
        ));
        Ok(())
    }

    /// Stop the reclaimer, wait for any in-flight cycle, and log final usage.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        let reclaimer = {
            let mut slot = lock(&self.reclaimer);
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop().await;
        }

        let usage = self.usage_stats();
        info!(
            total_entries = usage.total_entries,
            estimated_bytes = usage.estimated_bytes,
            correlation_count = usage.correlation_count,
            cleanup_operations = usage.cleanup_operations,
            "Unified memory model shut down"
        );
    }

    /// Whether a reclaimer task is installed and still running.
    pub fn reclaimer_running(&self) -> bool {
        lock(&self.reclaimer)
            .as_ref()
            .is_some_and(|r| !r.is_finished())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for UnifiedMemoryModel {
    fn drop(&mut self) {
        let reclaimer = self
            .reclaimer
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(reclaimer) = reclaimer.take() {
            reclaimer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryKind, Value};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn model() -> UnifiedMemoryModel {
        UnifiedMemoryModel::in_memory().unwrap()
    }

    fn entry(phase: &str, id: &str) -> PhaseMemoryEntry {
        PhaseMemoryEntry::new(phase, id, EntryKind::Artifact).with_content("path", "target/out")
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = UnifiedMemoryModel::new(MemoryConfig::default().with_max_entries(0));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_store_then_get_counts_access() {
        let model = model();
        for id in ["a", "b", "c"] {
            assert!(model.store_entry(entry("build", id)));
        }

        for id in ["a", "b", "c"] {
            let fetched = model.get_entry("build", id).unwrap();
            assert_eq!(fetched.access_count, 1);
        }
        assert!(model.get_entry("build", "missing").is_none());
        assert_eq!(model.usage_stats().phase_distribution.get("build"), Some(&3));
    }

    #[test]
    fn test_rejected_write_leaves_state_unchanged() {
        let model = UnifiedMemoryModel::new(MemoryConfig::default().with_max_memory_mb(1)).unwrap();
        assert!(model.store_entry(entry("build", "small")));
        let before = model.usage_stats();

        let huge = entry("build", "huge").with_content("blob", "x".repeat(2 * 1024 * 1024));
        assert!(!model.store_entry(huge.clone()));
        assert!(matches!(
            model.try_store_entry(huge),
            Err(Error::CapacityExceeded { .. })
        ));

        assert_eq!(model.usage_stats(), before);
        assert!(model.get_entry("build", "huge").is_none());
        assert!(!model.safety_report().compliant);
    }

    #[test]
    fn test_entry_limit_and_overwrite() {
        let model = UnifiedMemoryModel::new(MemoryConfig::default().with_max_entries(2)).unwrap();
        assert!(model.store_entry(entry("build", "a")));
        assert!(model.store_entry(entry("build", "b")));
        assert!(!model.store_entry(entry("build", "c")));

        // Overwriting an existing key does not grow the table
        assert!(model.store_entry(entry("build", "a").with_content("path", "target/new")));
        let a = model.get_entry("build", "a").unwrap();
        assert_eq!(a.content["path"], Value::from("target/new"));
        assert_eq!(a.access_count, 1);
        assert_eq!(model.usage_stats().total_entries, 2);
    }

    #[test]
    fn test_attached_correlations_are_persisted() {
        let model = model();
        let correlation = Correlation::new("build", "test", "artifact", 0.7).unwrap();
        let stored = entry("build", "a").with_correlation(correlation.clone());

        assert!(model.store_entry(stored));

        assert_eq!(model.correlations_for_phase("test"), vec![correlation]);
        assert_eq!(model.usage_stats().correlation_count, 1);
    }

    #[test]
    fn test_correlate_phases_round_trip() {
        let model = model();
        let mut metadata = ContentMap::new();
        metadata.insert("files".into(), Value::from(12));

        model
            .correlate_phases("build", "test", "performance", 0.85, metadata.clone())
            .unwrap();

        for phase in ["build", "test"] {
            let rows = model.correlations_for_phase(phase);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].correlation_type, "performance");
            assert_eq!(rows[0].strength, 0.85);
            assert_eq!(rows[0].metadata, metadata);
        }
    }

    #[test]
    fn test_listing_and_removal() {
        let model = model();
        model.store_entry(entry("build", "a").with_tag("release"));
        model.store_entry(entry("build", "b"));
        model.store_entry(entry("lint", "c").with_tag("release"));

        assert_eq!(model.entries_for_phase("build").len(), 2);
        assert_eq!(model.entries_with_tag("release").len(), 2);
        // Listing does not count as access
        assert_eq!(model.get_entry("build", "a").unwrap().access_count, 1);

        assert!(model.remove_entry("build", "a"));
        assert!(!model.remove_entry("build", "a"));
        assert_eq!(model.entries_with_tag("release").len(), 1);
        assert_eq!(model.usage_stats().total_entries, 2);
    }

    #[test]
    fn test_correlate_phases_rejects_bad_strength() {
        let model = model();
        let result = model.correlate_phases("build", "test", "performance", 1.5, ContentMap::new());
        assert!(matches!(result, Err(Error::InvalidStrength(_))));
        assert_eq!(model.usage_stats().correlation_count, 0);
        assert!(model.store().all_correlations().unwrap().is_empty());
    }

    #[test]
    fn test_build_to_test_scenario() {
        let model = model();
        for id in ["compile", "link", "package"] {
            assert!(model.store_entry(entry("build", id)));
        }
        for id in ["compile", "link", "package"] {
            assert_eq!(model.get_entry("build", id).unwrap().access_count, 1);
        }

        model
            .correlate_phases("build", "test", "performance", 0.85, ContentMap::new())
            .unwrap();

        let insights = model.learning_insights("test");
        assert!(insights
            .relevant_patterns
            .iter()
            .any(|p| p.source_phase == "build" && p.pattern_strength == 0.85));
        assert!((insights.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_improvement_math() {
        let model = model();
        let up = model
            .track_performance_improvement("build", "throughput", 100.0, 150.0, ContentMap::new())
            .unwrap();
        let zero = model
            .track_performance_improvement("build", "throughput", 0.0, 150.0, ContentMap::new())
            .unwrap();

        assert_eq!(up.improvement_percentage, 50.0);
        assert_eq!(zero.improvement_percentage, 0.0);
        assert_eq!(model.performance_trends(Some("build")).len(), 2);
        assert!(model
            .track_performance_improvement("build", "throughput", f64::NAN, 1.0, ContentMap::new())
            .is_err());
    }

    #[test]
    fn test_validation_status_feeds_report() {
        let model = model();
        let record = model
            .track_performance_improvement("build", "duration", 100.0, 200.0, ContentMap::new())
            .unwrap();

        let report = model.performance_report();
        assert_eq!(report.phase_performance["build"].validated_records, 0);

        assert!(model
            .set_validation_status("build", &record.id, ValidationStatus::Validated)
            .unwrap());

        let report = model.performance_report();
        let summary = &report.phase_performance["build"];
        assert_eq!(summary.validated_records, 1);
        assert_eq!(summary.best_improvement, Some(100.0));
        assert!(report
            .optimization_opportunities
            .iter()
            .any(|o| o.contains("standardize")));

        let persisted = model.performance_trends(Some("build"));
        assert_eq!(persisted[0].validation_status, ValidationStatus::Validated);
    }

    #[test]
    fn test_report_is_idempotent() {
        let model = model();
        model.store_entry(entry("build", "a"));
        model
            .correlate_phases("build", "test", "performance", 0.5, ContentMap::new())
            .unwrap();

        let first = model.performance_report();
        let second = model.performance_report();
        assert_eq!(first.usage, second.usage);
        assert_eq!(first.safety, second.safety);
        assert_eq!(first.learning_index, second.learning_index);
        assert_eq!(first.learning_index["build"]["test"], 0.5);
        assert!(first.gaps.is_empty());
    }

    #[test]
    fn test_reclaim_cycle_expires_ttl_entries() {
        let model = model();
        let mut short = entry("build", "short").with_ttl(Duration::from_secs(1));
        short.created_at = Utc::now() - chrono::Duration::milliseconds(1_500);
        assert!(model.store_entry(short));
        assert!(model.store_entry(entry("build", "long")));

        let outcome = model.run_reclaim_cycle();

        assert_eq!(outcome.expired, 1);
        assert!(model.get_entry("build", "short").is_none());
        assert!(model.get_entry("build", "long").is_some());
        let usage = model.usage_stats();
        assert_eq!(usage.cleanup_operations, 1);
        assert!(usage.last_cleanup.is_some());
    }

    #[test]
    fn test_reclaim_cycle_evicts_under_pressure() {
        let model = UnifiedMemoryModel::new(MemoryConfig::default().with_max_memory_mb(1)).unwrap();
        let blob = "x".repeat(42 * 1024);
        for i in 0..23 {
            assert!(model.store_entry(entry("build", &format!("e{:02}", i)).with_content("blob", blob.as_str())));
        }
        // Refresh every entry except e00..e02 so they are least recently used
        for i in 3..23 {
            model.get_entry("build", &format!("e{:02}", i)).unwrap();
        }
        let bytes = model.usage_stats().estimated_bytes;
        assert!(bytes as f64 > model.config().max_memory_bytes() as f64 * 0.9);

        let outcome = model.run_reclaim_cycle();

        // 10% of 23 rounded up
        assert_eq!(outcome.evicted, 3);
        for i in 0..3 {
            assert!(model.get_entry("build", &format!("e{:02}", i)).is_none());
        }
        assert_eq!(model.usage_stats().total_entries, 20);
    }

    #[test]
    fn test_no_eviction_below_pressure() {
        let model = model();
        model.store_entry(entry("build", "a"));
        let outcome = model.run_reclaim_cycle();
        assert_eq!(outcome.evicted, 0);
        assert_eq!(outcome.purged, 0);
        assert!(outcome.purge_error.is_none());
    }

    #[test]
    fn test_reopen_restores_learning_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig::persistent(dir.path().join("memory.db"));

        {
            let model = UnifiedMemoryModel::new(config.clone()).unwrap();
            model
                .correlate_phases("lint", "test", "quality", 0.4, ContentMap::new())
                .unwrap();
        }

        let reopened = UnifiedMemoryModel::new(config).unwrap();
        assert_eq!(reopened.usage_stats().correlation_count, 1);
        let insights = reopened.learning_insights("test");
        assert_eq!(insights.performance_correlations.len(), 1);
        assert_eq!(insights.performance_correlations[0].source_phase, "lint");
    }

    #[test]
    fn test_start_reclaimer_requires_runtime() {
        let model = Arc::new(model());
        assert!(matches!(model.start_reclaimer(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let model = Arc::new(model());
        model.start_reclaimer().unwrap();
        assert!(model.start_reclaimer().is_err());

        model.shutdown().await;
        model.shutdown().await;

        assert!(model.is_shut_down());
        assert!(model.start_reclaimer().is_err());
        assert!(!model.reclaimer_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_racing_shutdown_never_leaves_reclaimer() {
        for _ in 0..50 {
            let model = Arc::new(model());
            let starter = {
                let model = Arc::clone(&model);
                let handle = tokio::runtime::Handle::current();
                std::thread::spawn(move || {
                    let _guard = handle.enter();
                    model.start_reclaimer().is_ok()
                })
            };

            model.shutdown().await;
            starter.join().unwrap();

            assert!(model.is_shut_down());
            assert!(!model.reclaimer_running());
        }
    }

    #[test]
    fn test_restoring_fetched_entry_keeps_correlation_counts() {
        let model = model();
        let correlation = Correlation::new("build", "test", "artifact", 0.6).unwrap();
        assert!(model.store_entry(entry("build", "a").with_correlation(correlation)));

        let fetched = model.get_entry("build", "a").unwrap();
        assert!(model.store_entry(fetched.with_content("k", "v")));

        assert_eq!(model.store().stats().unwrap().correlations, 1);
        assert_eq!(model.usage_stats().correlation_count, 1);
        let insights = model.learning_insights("test");
        assert_eq!(insights.performance_correlations[0].observations, 1);
    }

    #[test]
    fn test_duplicate_correlation_across_entries_counted_once() {
        let model = model();
        let correlation = Correlation::new("build", "test", "artifact", 0.6).unwrap();
        assert!(model.store_entry(entry("build", "a").with_correlation(correlation.clone())));
        assert!(model.store_entry(entry("build", "b").with_correlation(correlation)));

        assert_eq!(model.usage_stats().correlation_count, 1);
        assert_eq!(model.store().stats().unwrap().correlations, 1);
    }

    #[test]
    fn test_attached_correlation_strength_is_validated() {
        let model = model();
        let mut bogus = Correlation::new("build", "test", "artifact", 0.5).unwrap();
        bogus.strength = 5.0;

        let result = model.try_store_entry(entry("build", "a").with_correlation(bogus));

        assert!(matches!(result, Err(Error::InvalidStrength(_))));
        assert!(model.get_entry("build", "a").is_none());
        assert_eq!(model.usage_stats().correlation_count, 0);
        assert!(model.store().all_correlations().unwrap().is_empty());
    }

    #[test]
    fn test_purge_removes_correlations_from_learning_index() {
        let model = model();
        let mut stale = Correlation::new("build", "test", "performance", 0.2).unwrap();
        stale.timestamp = Utc::now() - chrono::Duration::days(45);
        assert!(model.store_entry(entry("build", "a").with_correlation(stale)));
        model
            .correlate_phases("lint", "deploy", "quality", 0.9, ContentMap::new())
            .unwrap();

        let outcome = model.run_reclaim_cycle();

        assert_eq!(outcome.purged, 1);
        let insights = model.learning_insights("test");
        assert!(insights.relevant_patterns.is_empty());
        assert!(insights.performance_correlations.is_empty());
        assert_eq!(insights.confidence, 0.0);
        assert_eq!(model.usage_stats().correlation_count, 1);

        let report = model.performance_report();
        assert!(!report.learning_index.contains_key("build"));
        assert_eq!(report.learning_index["lint"]["deploy"], 0.9);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let model = Arc::new(model());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let phase = format!("phase-{}", t);
                        let id = format!("entry-{}", i);
                        assert!(model.store_entry(entry(&phase, &id)));
                        assert!(model.get_entry(&phase, &id).is_some());
                        model
                            .correlate_phases(&phase, "report", "pattern", 0.5, ContentMap::new())
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let usage = model.usage_stats();
        assert_eq!(usage.total_entries, 400);
        assert_eq!(usage.correlation_count, 400);
        assert_eq!(model.learning_insights("report").performance_correlations.len(), 8);
    }
}
