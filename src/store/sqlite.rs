//! SQLite-backed correlation and performance store.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::store::cache::{CacheStats, CorrelationCache};
use crate::store::schema::{initialize_schema, is_initialized};
use crate::types::{
    ContentMap, Correlation, CorrelationId, PerformanceRecord, RecordId, ValidationStatus,
};

const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Durable, append-only storage for correlations and performance records.
///
/// Rows outlive entry-table turnover and are removed only by
/// [`purge_older_than`](Self::purge_older_than).
pub struct CorrelationStore {
    conn: Arc<Mutex<Connection>>,
    cache: Mutex<CorrelationCache>,
}

/// Rows removed by a retention purge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeOutcome {
    /// Deleted correlation rows, oldest first
    pub correlations: Vec<Correlation>,
    pub performance_records: usize,
}

impl PurgeOutcome {
    pub fn total(&self) -> usize {
        self.correlations.len() + self.performance_records
    }
}

/// Row counts of the durable store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub correlations: u64,
    pub performance_records: u64,
}

impl CorrelationStore {
    /// Open or create a store at the given path.
    pub fn open(
        path: impl AsRef<Path>,
        busy_timeout: std::time::Duration,
        cache_capacity: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        if !is_initialized(&conn) {
            initialize_schema(&conn)?;
        }

        info!(path = %path.display(), "Opened correlation store");
        Self::from_connection(conn, cache_capacity)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Self::from_connection(conn, DEFAULT_CACHE_CAPACITY)
    }

    /// Open the store described by `config`, in memory when no path is set.
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        match config.resolved_db_path() {
            Some(path) => Self::open(
                path,
                config.busy_timeout(),
                config.correlation_cache_capacity,
            ),
            None => {
                let conn = Connection::open_in_memory()?;
                initialize_schema(&conn)?;
                Self::from_connection(conn, config.correlation_cache_capacity)
            }
        }
    }

    fn from_connection(conn: Connection, cache_capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_capacity)
            .ok_or_else(|| Error::config("correlation cache capacity must be positive"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Mutex::new(CorrelationCache::new(capacity)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(Error::from)
    }

    fn with_cache<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut CorrelationCache) -> T,
    {
        let mut cache = self
            .cache
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock correlation cache: {}", e)))?;
        Ok(f(&mut cache))
    }

    // ==================== Correlations ====================

    /// Append a correlation row.
    ///
    /// Returns false when a row with the same id already exists; the
    /// existing row is left unchanged.
    pub fn store_correlation(&self, correlation: &Correlation) -> Result<bool> {
        let metadata = serde_json::to_string(&correlation.metadata)?;

        let inserted = self.with_conn(|conn| {
            let rows = conn.execute(
                "INSERT OR IGNORE INTO phase_correlations (
                    id, source_phase, target_phase, correlation_type, strength, metadata, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    correlation.id.to_string(),
                    correlation.source_phase,
                    correlation.target_phase,
                    correlation.correlation_type,
                    correlation.strength,
                    metadata,
                    format_timestamp(correlation.timestamp),
                ],
            )?;
            Ok(rows > 0)
        })?;

        if inserted {
            self.with_cache(|cache| {
                cache.invalidate_pair(&correlation.source_phase, &correlation.target_phase)
            })?;
        }
        Ok(inserted)
    }

    /// Correlations where `phase` is the source or the target, newest first.
    pub fn correlations_for_phase(&self, phase: &str) -> Result<Vec<Correlation>> {
        let (cached, generation) = self.with_cache(|cache| (cache.get(phase), cache.generation()))?;
        if let Some(rows) = cached {
            return Ok(rows);
        }

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_phase, target_phase, correlation_type, strength, metadata, timestamp
                 FROM phase_correlations
                 WHERE source_phase = ?1 OR target_phase = ?1
                 ORDER BY timestamp DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map(params![phase], |row| Self::row_to_correlation(row))?
                .filter_map(|r| r.ok())
                .collect::<Vec<_>>();
            Ok(rows)
        })?;

        self.with_cache(|cache| cache.put_if_current(phase, rows.clone(), generation))?;
        Ok(rows)
    }

    /// Every persisted correlation, oldest first.
    pub fn all_correlations(&self) -> Result<Vec<Correlation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, source_phase, target_phase, correlation_type, strength, metadata, timestamp
                 FROM phase_correlations
                 ORDER BY timestamp ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([], |row| Self::row_to_correlation(row))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    fn row_to_correlation(row: &rusqlite::Row) -> rusqlite::Result<Correlation> {
        let id_str: String = row.get(0)?;
        Ok(Correlation {
            id: CorrelationId::parse(&id_str).unwrap_or_else(|_| CorrelationId::new()),
            source_phase: row.get(1)?,
            target_phase: row.get(2)?,
            correlation_type: row.get(3)?,
            strength: row.get(4)?,
            metadata: parse_map(row.get::<_, Option<String>>(5)?),
            timestamp: parse_datetime(row.get::<_, String>(6)?),
        })
    }

    // ==================== Performance ====================

    /// Append a performance record row.
    pub fn store_performance(&self, record: &PerformanceRecord) -> Result<()> {
        let factors = serde_json::to_string(&record.correlation_factors)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO performance_improvements (
                    id, phase, metric_name, baseline_value, current_value,
                    improvement_percentage, correlation_factors, timestamp, validation_status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.phase,
                    record.metric_name,
                    record.baseline_value,
                    record.current_value,
                    record.improvement_percentage,
                    factors,
                    format_timestamp(record.timestamp),
                    record.validation_status.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    /// Performance records, optionally for one phase, newest first.
    pub fn performance_trends(&self, phase: Option<&str>) -> Result<Vec<PerformanceRecord>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, phase, metric_name, baseline_value, current_value,
                        improvement_percentage, correlation_factors, timestamp, validation_status
                 FROM performance_improvements",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(phase) = phase {
                sql.push_str(" WHERE phase = ?");
                params_vec.push(Box::new(phase.to_string()));
            }

            sql.push_str(" ORDER BY timestamp DESC, rowid DESC");

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_record(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(records)
        })
    }

    /// Set the validation status of a record. Returns false if no such record exists.
    pub fn set_validation_status(&self, id: &RecordId, status: ValidationStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE performance_improvements SET validation_status = ?2 WHERE id = ?1",
                params![id.to_string(), status.to_string()],
            )?;
            Ok(rows > 0)
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PerformanceRecord> {
        let id_str: String = row.get(0)?;
        let status_str: String = row.get(8)?;
        Ok(PerformanceRecord {
            id: RecordId::parse(&id_str).unwrap_or_else(|_| RecordId::new()),
            phase: row.get(1)?,
            metric_name: row.get(2)?,
            baseline_value: row.get(3)?,
            current_value: row.get(4)?,
            improvement_percentage: row.get(5)?,
            correlation_factors: parse_map(row.get::<_, Option<String>>(6)?),
            timestamp: parse_datetime(row.get::<_, String>(7)?),
            validation_status: status_str.parse().unwrap_or_default(),
        })
    }

    // ==================== Retention ====================

    /// Delete rows older than `max_age_days`. Returns the number of rows removed.
    pub fn purge_older_than(&self, max_age_days: u32) -> Result<usize> {
        Ok(self.purge_expired(max_age_days)?.total())
    }

    /// Delete rows older than `max_age_days`, returning the removed correlations.
    pub fn purge_expired(&self, max_age_days: u32) -> Result<PurgeOutcome> {
        let cutoff = format_timestamp(Utc::now() - Duration::days(i64::from(max_age_days)));

        let outcome = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let correlations = {
                let mut stmt = tx.prepare(
                    "SELECT id, source_phase, target_phase, correlation_type, strength, metadata, timestamp
                     FROM phase_correlations
                     WHERE timestamp < ?1
                     ORDER BY timestamp ASC, rowid ASC",
                )?;
                let rows = stmt
                    .query_map(params![cutoff], |row| Self::row_to_correlation(row))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            tx.execute(
                "DELETE FROM phase_correlations WHERE timestamp < ?1",
                params![cutoff],
            )?;
            let performance_records = tx.execute(
                "DELETE FROM performance_improvements WHERE timestamp < ?1",
                params![cutoff],
            )?;
            tx.commit()?;
            Ok(PurgeOutcome {
                correlations,
                performance_records,
            })
        })?;

        self.with_cache(|cache| cache.clear())?;

        let removed = outcome.total();
        if removed > 0 {
            info!(
                removed,
                correlations = outcome.correlations.len(),
                max_age_days,
                "Purged expired correlation rows"
            );
        } else {
            debug!(max_age_days, "Retention purge found nothing to remove");
        }
        Ok(outcome)
    }

    /// Row counts.
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let correlations: i64 =
                conn.query_row("SELECT COUNT(*) FROM phase_correlations", [], |row| row.get(0))?;
            let performance_records: i64 = conn.query_row(
                "SELECT COUNT(*) FROM performance_improvements",
                [],
                |row| row.get(0),
            )?;
            Ok(StoreStats {
                correlations: correlations as u64,
                performance_records: performance_records as u64,
            })
        })
    }

    /// Read-through cache statistics.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.with_cache(|cache| cache.stats())
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(timestamp = %s, "Unparseable row timestamp, using current time: {}", e);
            Utc::now()
        })
}

fn parse_map(raw: Option<String>) -> ContentMap {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}
