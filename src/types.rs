//! Core data model: phase entries, correlations and performance records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Schema-less payload value.
///
/// Closed set of variants so that serialization and size estimation stay
/// well-defined for entry content and correlation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Ordered string-keyed payload map.
pub type ContentMap = BTreeMap<String, Value>;

/// Kind of a phase memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Coordination,
    Artifact,
    Performance,
    Pattern,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordination => write!(f, "coordination"),
            Self::Artifact => write!(f, "artifact"),
            Self::Performance => write!(f, "performance"),
            Self::Pattern => write!(f, "pattern"),
        }
    }
}

/// Key of a live entry: (phase, entry id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub phase: String,
    pub entry_id: String,
}

impl EntryKey {
    pub fn new(phase: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            entry_id: entry_id.into(),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.phase, self.entry_id)
    }
}

/// A cached content unit belonging to one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMemoryEntry {
    pub phase: String,
    pub entry_id: String,
    pub kind: EntryKind,
    pub content: ContentMap,
    /// Correlations persisted alongside the entry when it is stored
    pub correlations: Vec<Correlation>,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Lifetime measured from `created_at`
    pub ttl: Option<Duration>,
    pub tags: BTreeSet<String>,
}

impl PhaseMemoryEntry {
    pub fn new(phase: impl Into<String>, entry_id: impl Into<String>, kind: EntryKind) -> Self {
        let now = Utc::now();
        Self {
            phase: phase.into(),
            entry_id: entry_id.into(),
            kind,
            content: ContentMap::new(),
            correlations: Vec::new(),
            access_count: 0,
            last_accessed: now,
            created_at: now,
            ttl: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_content(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(key.into(), value.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlations.push(correlation);
        self
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.phase.clone(), self.entry_id.clone())
    }

    /// Size of the serialized entry in bytes.
    pub fn estimated_size(&self) -> Result<u64> {
        Ok(serde_json::to_vec(self)?.len() as u64)
    }

    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => (now - self.created_at)
                .to_std()
                .map(|age| age > ttl)
                .unwrap_or(false),
            None => false,
        }
    }

    /// Record an access.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}

/// Unique identifier for a persisted correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check that a correlation strength lies in [0, 1].
pub fn validate_strength(strength: f64) -> Result<f64> {
    if strength.is_finite() && (0.0..=1.0).contains(&strength) {
        Ok(strength)
    } else {
        Err(Error::InvalidStrength(strength))
    }
}

/// Directed, weighted relationship between two phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub id: CorrelationId,
    pub source_phase: String,
    pub target_phase: String,
    pub correlation_type: String,
    pub strength: f64,
    pub metadata: ContentMap,
    pub timestamp: DateTime<Utc>,
}

impl Correlation {
    /// Create a correlation, rejecting strengths outside [0, 1].
    pub fn new(
        source_phase: impl Into<String>,
        target_phase: impl Into<String>,
        correlation_type: impl Into<String>,
        strength: f64,
    ) -> Result<Self> {
        Ok(Self {
            id: CorrelationId::new(),
            source_phase: source_phase.into(),
            target_phase: target_phase.into(),
            correlation_type: correlation_type.into(),
            strength: validate_strength(strength)?,
            metadata: ContentMap::new(),
            timestamp: Utc::now(),
        })
    }

    pub fn with_metadata(mut self, metadata: ContentMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether the correlation touches `phase` on either end.
    pub fn involves(&self, phase: &str) -> bool {
        self.source_phase == phase || self.target_phase == phase
    }
}

/// Unique identifier for a persisted performance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validation state of a performance record, set by an external validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Validated,
    Rejected,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validated => write!(f, "validated"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "validated" => Ok(Self::Validated),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::invalid_input(format!(
                "unknown validation status '{}'",
                other
            ))),
        }
    }
}

/// Percentage change from `baseline` to `current`; zero when the baseline is zero.
pub fn improvement_percentage(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        0.0
    } else {
        (current - baseline) / baseline * 100.0
    }
}

/// Before/after measurement of one metric in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub id: RecordId,
    pub phase: String,
    pub metric_name: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub improvement_percentage: f64,
    pub correlation_factors: ContentMap,
    pub timestamp: DateTime<Utc>,
    pub validation_status: ValidationStatus,
}

impl PerformanceRecord {
    pub fn new(
        phase: impl Into<String>,
        metric_name: impl Into<String>,
        baseline_value: f64,
        current_value: f64,
        correlation_factors: ContentMap,
    ) -> Self {
        Self {
            id: RecordId::new(),
            phase: phase.into(),
            metric_name: metric_name.into(),
            baseline_value,
            current_value,
            improvement_percentage: improvement_percentage(baseline_value, current_value),
            correlation_factors,
            timestamp: Utc::now(),
            validation_status: ValidationStatus::Pending,
        }
    }

    pub fn is_validated(&self) -> bool {
        self.validation_status == ValidationStatus::Validated
    }
}

/// Snapshot of entry table occupancy and reclaimer activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_entries: usize,
    pub estimated_bytes: u64,
    pub phase_distribution: BTreeMap<String, usize>,
    pub correlation_count: u64,
    pub cleanup_operations: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}
