//! Streaming baselines and z-score classification.
//!
//! A baseline keeps only `(count, mean, m2)` per (zone, category) and is updated
//! with Welford's recurrence, so memory and time per update are constant no
//! matter how long the history is.

use std::collections::BTreeMap;

use contracts::{AnomalyThresholds, BaselineRecord, Category, FindingSeverity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ComputationError;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub last_observed_at: u64,
}

impl Baseline {
    pub fn update(&mut self, observed: f64, at: u64) {
        self.count += 1;
        let delta = observed - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = observed - self.mean;
        self.m2 += delta * delta2;
        self.last_observed_at = self.last_observed_at.max(at);
    }

    /// Sample variance; zero while `count <= 1`.
    pub fn variance(&self) -> f64 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Builds a baseline that reports the given mean and sample variance.
    pub fn from_moments(count: u64, mean: f64, variance: f64, last_observed_at: u64) -> Self {
        let m2 = if count > 1 {
            variance * (count - 1) as f64
        } else {
            0.0
        };
        Self {
            count,
            mean,
            m2,
            last_observed_at,
        }
    }

    pub fn check(&self, category: Category) -> Result<(), ComputationError> {
        let corrupt = |reason: &str| ComputationError::CorruptBaseline {
            category,
            reason: reason.to_string(),
        };
        if !self.mean.is_finite() || !self.m2.is_finite() {
            return Err(corrupt("non-finite moments"));
        }
        if self.m2 < 0.0 {
            return Err(corrupt("negative m2"));
        }
        if self.count == 0 && (self.mean != 0.0 || self.m2 != 0.0) {
            return Err(corrupt("moments without observations"));
        }
        Ok(())
    }
}

/// `(observed - mean) / stdev`, or `None` when the baseline cannot support a
/// deviation estimate yet.
pub fn z_score(observed: f64, baseline: &Baseline) -> Option<f64> {
    if baseline.count <= 1 {
        return None;
    }
    let variance = baseline.variance();
    if !(variance > 0.0) {
        return None;
    }
    let z = (observed - baseline.mean) / variance.sqrt();
    z.is_finite().then_some(z)
}

/// Highest satisfied threshold, or `None` below the elevated threshold.
pub fn classify(z: f64, thresholds: &AnomalyThresholds) -> Option<FindingSeverity> {
    if z >= thresholds.critical {
        Some(FindingSeverity::Critical)
    } else if z >= thresholds.high {
        Some(FindingSeverity::High)
    } else if z >= thresholds.elevated {
        Some(FindingSeverity::Elevated)
    } else {
        None
    }
}

/// Result of evaluating one observation against its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub category: Category,
    pub observed: f64,
    pub baseline_mean: f64,
    pub z_score: Option<f64>,
    pub severity: Option<FindingSeverity>,
}

pub type ZoneBaselines = BTreeMap<Category, Baseline>;

#[derive(Debug)]
pub struct AnomalyDetector {
    thresholds: AnomalyThresholds,
    baselines: Mutex<BTreeMap<String, ZoneBaselines>>,
}

impl AnomalyDetector {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self {
            thresholds,
            baselines: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn thresholds(&self) -> &AnomalyThresholds {
        &self.thresholds
    }

    /// Copy of a zone's baselines, taken when the tick starts the zone.
    pub fn snapshot(&self, zone_id: &str) -> ZoneBaselines {
        self.baselines
            .lock()
            .get(zone_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluates an observation against the prior baseline, before the
    /// observation is folded in.
    pub fn evaluate(
        &self,
        category: Category,
        observed: f64,
        prior: Option<&Baseline>,
    ) -> Result<Evaluation, ComputationError> {
        if let Some(baseline) = prior {
            baseline.check(category)?;
        }
        let z = prior.and_then(|baseline| z_score(observed, baseline));
        Ok(Evaluation {
            category,
            observed,
            baseline_mean: prior.map(|baseline| baseline.mean).unwrap_or(0.0),
            z_score: z,
            severity: z.and_then(|z| classify(z, &self.thresholds)),
        })
    }

    /// Writes back a zone's baselines after a successful tick. Counts never
    /// move backwards; a stale write for a pair is ignored.
    pub fn commit(&self, zone_id: &str, updated: ZoneBaselines) {
        let mut baselines = self.baselines.lock();
        let zone = baselines.entry(zone_id.to_string()).or_default();
        for (category, baseline) in updated {
            match zone.get(&category) {
                Some(current) if current.count > baseline.count => {}
                _ => {
                    zone.insert(category, baseline);
                }
            }
        }
    }

    pub fn get(&self, zone_id: &str, category: Category) -> Option<Baseline> {
        self.baselines
            .lock()
            .get(zone_id)
            .and_then(|zone| zone.get(&category))
            .copied()
    }

    pub fn insert(&self, zone_id: &str, category: Category, baseline: Baseline) {
        self.baselines
            .lock()
            .entry(zone_id.to_string())
            .or_default()
            .insert(category, baseline);
    }

    /// Drops pairs with no observation since `now - stale_secs`.
    pub fn prune_stale(&self, now: u64, stale_secs: u64) -> usize {
        let cutoff = now.saturating_sub(stale_secs);
        let mut pruned = 0;
        let mut baselines = self.baselines.lock();
        for zone in baselines.values_mut() {
            let before = zone.len();
            zone.retain(|_, baseline| baseline.last_observed_at >= cutoff);
            pruned += before - zone.len();
        }
        baselines.retain(|_, zone| !zone.is_empty());
        pruned
    }

    pub fn pair_count(&self) -> usize {
        self.baselines.lock().values().map(BTreeMap::len).sum()
    }

    pub fn records(&self) -> Vec<BaselineRecord> {
        let baselines = self.baselines.lock();
        baselines
            .iter()
            .flat_map(|(zone_id, zone)| {
                zone.iter().map(move |(category, baseline)| BaselineRecord {
                    zone_id: zone_id.clone(),
                    category: *category,
                    count: baseline.count,
                    mean: baseline.mean,
                    m2: baseline.m2,
                    last_observed_at: baseline.last_observed_at,
                })
            })
            .collect()
    }

    pub fn records_for(&self, zone_id: &str) -> Vec<BaselineRecord> {
        self.snapshot(zone_id)
            .into_iter()
            .map(|(category, baseline)| BaselineRecord {
                zone_id: zone_id.to_string(),
                category,
                count: baseline.count,
                mean: baseline.mean,
                m2: baseline.m2,
                last_observed_at: baseline.last_observed_at,
            })
            .collect()
    }
}

impl From<&BaselineRecord> for Baseline {
    fn from(record: &BaselineRecord) -> Self {
        Self {
            count: record.count,
            mean: record.mean,
            m2: record.m2,
            last_observed_at: record.last_observed_at,
        }
    }
}
