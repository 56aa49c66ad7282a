//! v1 cross-boundary contracts for the instability core, API, persistence and presentation readers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod serde_u64_string;
pub mod signal;

pub use config::{
    AnomalyThresholds, CategoryWeights, ConfigError, ConvergenceConfig, InstabilityConfig,
    SignalRoute,
};
pub use signal::{
    CyberKind, EconomyKind, EnvironmentKind, FactionKind, InfrastructureKind, PayloadError,
    PopulationKind, SecurityKind, SignalPayload,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// The seven fixed signal domains. Declaration order is the canonical
/// iteration order everywhere scores are aggregated.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Infrastructure,
    Faction,
    Environment,
    Economy,
    Population,
    Cyber,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Security,
        Category::Infrastructure,
        Category::Faction,
        Category::Environment,
        Category::Economy,
        Category::Population,
        Category::Cyber,
    ];

    pub const fn index(self) -> usize {
        match self {
            Category::Security => 0,
            Category::Infrastructure => 1,
            Category::Faction => 2,
            Category::Environment => 3,
            Category::Economy => 4,
            Category::Population => 5,
            Category::Cyber => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Infrastructure => "infrastructure",
            Category::Faction => "faction",
            Category::Environment => "environment",
            Category::Economy => "economy",
            Category::Population => "population",
            Category::Cyber => "cyber",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .ok_or_else(|| UnknownCategory(raw.to_string()))
    }
}

/// One value per category, stored densely in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CategoryScores(pub [f64; 7]);

impl CategoryScores {
    pub fn get(&self, category: Category) -> f64 {
        self.0[category.index()]
    }

    pub fn set(&mut self, category: Category, value: f64) {
        self.0[category.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL.into_iter().map(|category| (category, self.get(category)))
    }

    pub fn to_map(&self) -> BTreeMap<Category, f64> {
        self.iter().collect()
    }

    pub fn from_map(map: &BTreeMap<Category, f64>) -> Self {
        let mut scores = Self::default();
        for (category, value) in map {
            scores.set(*category, *value);
        }
        scores
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    #[default]
    Stable,
    Falling,
}

/// Named escalation band of a composite score.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Stable,
    Elevated,
    Unstable,
    Critical,
    Emergency,
}

impl Tier {
    /// Lower bound (inclusive) of each band, ascending.
    pub const LOWER_BOUNDS: [(f64, Tier); 5] = [
        (0.0, Tier::Stable),
        (21.0, Tier::Elevated),
        (41.0, Tier::Unstable),
        (61.0, Tier::Critical),
        (81.0, Tier::Emergency),
    ];

    /// Maps any composite score onto exactly one band. Values below 0 fall in
    /// the lowest band and values above 100 in the highest, so the partition is
    /// total over every finite input.
    pub fn for_score(score: f64) -> Tier {
        let mut tier = Tier::Stable;
        for (lower, band) in Self::LOWER_BOUNDS {
            if score >= lower {
                tier = band;
            }
        }
        tier
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Elevated,
    High,
    Critical,
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingSeverity::Elevated => "elevated",
            FindingSeverity::High => "high",
            FindingSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Anomaly,
    Convergence,
}

/// A structured record of an observation that deviated from its baseline, or
/// of several categories deviating together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(with = "serde_u64_string")]
    pub sequence: u64,
    pub kind: FindingKind,
    pub zone_id: String,
    /// Absent for convergence findings, which span several categories.
    pub category: Option<Category>,
    pub observed: f64,
    pub baseline_mean: f64,
    pub z_score: f64,
    pub severity: FindingSeverity,
    pub message: String,
    pub tick: u64,
    pub timestamp: u64,
    pub expiry: u64,
}

impl Finding {
    pub fn is_active_at(&self, now: u64) -> bool {
        now < self.expiry
    }
}

/// Read-only view of a zone for presentation collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneStateView {
    pub zone_id: String,
    pub name: String,
    pub zone_type: String,
    pub room_count: u32,
    pub composite_score: f64,
    pub layer_scores: BTreeMap<Category, f64>,
    pub trend: Trend,
    pub tier: Tier,
    pub convergence_level: u8,
    pub last_computed_tick: Option<u64>,
}

/// Input to `register_zone`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneRegistration {
    pub zone_id: String,
    pub name: String,
    pub zone_type: String,
    pub room_count: u32,
    #[serde(default)]
    pub weight_overrides: Option<BTreeMap<Category, f64>>,
}

impl ZoneRegistration {
    pub fn new(
        zone_id: impl Into<String>,
        name: impl Into<String>,
        zone_type: impl Into<String>,
        room_count: u32,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            name: name.into(),
            zone_type: zone_type.into(),
            room_count,
            weight_overrides: None,
        }
    }
}

/// Persisted zone row: registration plus the last computed scores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZoneRecordState {
    pub registration: ZoneRegistration,
    pub layer_scores: BTreeMap<Category, f64>,
    pub composite_score: f64,
    pub last_tick_composite: f64,
    pub trend: Trend,
    pub convergence_level: u8,
    pub last_computed_tick: Option<u64>,
}

/// Persisted baseline row keyed by (zone_id, category).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaselineRecord {
    pub zone_id: String,
    pub category: Category,
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub last_observed_at: u64,
}

/// Operational record of one zone that failed during a tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ZoneFailure {
    pub zone_id: String,
    pub error: String,
}

/// Health-channel summary of one scheduler cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: u64,
    pub zones_processed: usize,
    pub zones_skipped: usize,
    pub failures: Vec<ZoneFailure>,
    pub findings_emitted: usize,
    pub cancelled: bool,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick={} processed={} skipped={} failed={} findings={} cancelled={}",
            self.tick,
            self.zones_processed,
            self.zones_skipped,
            self.failures.len(),
            self.findings_emitted,
            self.cancelled
        )
    }
}

/// Summary of one baseline maintenance pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    pub ran_at: u64,
    pub baselines_pruned: usize,
    pub findings_pruned: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ZoneNotFound,
    UnknownZone,
    InvalidSeverity,
    InvalidPayload,
    InvalidRegistration,
    InvalidQuery,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}
