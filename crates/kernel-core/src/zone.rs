//! Zone registry: authoritative per-zone metadata and scores.

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{
    Category, CategoryScores, CategoryWeights, Tier, Trend, ZoneRecordState, ZoneRegistration,
    ZoneStateView,
};
use parking_lot::{Mutex, RwLock};

use crate::error::RegistrationError;
use crate::layer::MAX_SCORE;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMeta {
    pub registration: ZoneRegistration,
    /// Global weights, or the zone's validated overrides.
    pub weights: CategoryWeights,
}

impl ZoneMeta {
    pub fn room_count(&self) -> u32 {
        self.registration.room_count
    }
}

/// Scores owned by the compute phase, except `layer_scores` which ingestion
/// may nudge upward between ticks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneScores {
    pub layer_scores: CategoryScores,
    pub composite_score: f64,
    pub last_tick_composite: f64,
    pub trend: Trend,
    pub convergence_level: u8,
    pub last_computed_tick: Option<u64>,
}

impl ZoneScores {
    pub fn tier(&self) -> Tier {
        Tier::for_score(self.composite_score)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRecord {
    pub meta: ZoneMeta,
    pub scores: ZoneScores,
}

impl ZoneRecord {
    pub fn view(&self) -> ZoneStateView {
        let registration = &self.meta.registration;
        ZoneStateView {
            zone_id: registration.zone_id.clone(),
            name: registration.name.clone(),
            zone_type: registration.zone_type.clone(),
            room_count: registration.room_count,
            composite_score: self.scores.composite_score,
            layer_scores: self.scores.layer_scores.to_map(),
            trend: self.scores.trend,
            tier: self.scores.tier(),
            convergence_level: self.scores.convergence_level,
            last_computed_tick: self.scores.last_computed_tick,
        }
    }

    pub fn to_state(&self) -> ZoneRecordState {
        ZoneRecordState {
            registration: self.meta.registration.clone(),
            layer_scores: self.scores.layer_scores.to_map(),
            composite_score: self.scores.composite_score,
            last_tick_composite: self.scores.last_tick_composite,
            trend: self.scores.trend,
            convergence_level: self.scores.convergence_level,
            last_computed_tick: self.scores.last_computed_tick,
        }
    }
}

/// `Σ layer_score[c] * weight[c]` in canonical category order.
pub fn weighted_sum(layer_scores: &CategoryScores, weights: &CategoryWeights) -> f64 {
    Category::ALL
        .into_iter()
        .map(|category| layer_scores.get(category) * weights.get(category))
        .sum()
}

/// Weighted sum, then the convergence multiplier, then one final clamp.
pub fn compute_composite(raw: f64, convergence_multiplier: f64) -> f64 {
    (raw * convergence_multiplier).clamp(0.0, MAX_SCORE)
}

pub fn trend_between(previous: f64, current: f64, epsilon: f64) -> Trend {
    let delta = current - previous;
    if delta > epsilon {
        Trend::Rising
    } else if delta < -epsilon {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

pub(crate) fn validate_zone_id(zone_id: &str) -> Result<(), RegistrationError> {
    if zone_id.is_empty() || zone_id.chars().any(char::is_whitespace) {
        return Err(RegistrationError::InvalidZoneId(zone_id.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub struct ZoneRegistry {
    default_weights: CategoryWeights,
    zones: RwLock<BTreeMap<String, Arc<Mutex<ZoneRecord>>>>,
}

impl ZoneRegistry {
    pub fn new(default_weights: CategoryWeights) -> Self {
        Self {
            default_weights,
            zones: RwLock::new(BTreeMap::new()),
        }
    }

    fn entry(&self, zone_id: &str) -> Option<Arc<Mutex<ZoneRecord>>> {
        self.zones.read().get(zone_id).cloned()
    }

    fn resolve_meta(&self, registration: ZoneRegistration) -> Result<ZoneMeta, RegistrationError> {
        validate_zone_id(&registration.zone_id)?;
        let weights = match &registration.weight_overrides {
            Some(overrides) => CategoryWeights::from_map(overrides).map_err(|source| {
                RegistrationError::InvalidWeights {
                    zone_id: registration.zone_id.clone(),
                    source,
                }
            })?,
            None => self.default_weights,
        };
        Ok(ZoneMeta {
            registration,
            weights,
        })
    }

    /// Creates the zone, or updates metadata of an existing one without
    /// touching its scores. Returns true when the zone is new.
    pub fn register(&self, registration: ZoneRegistration) -> Result<bool, RegistrationError> {
        let meta = self.resolve_meta(registration)?;
        if let Some(existing) = self.entry(&meta.registration.zone_id) {
            existing.lock().meta = meta;
            return Ok(false);
        }

        let mut zones = self.zones.write();
        if let Some(existing) = zones.get(&meta.registration.zone_id) {
            existing.lock().meta = meta;
            return Ok(false);
        }
        let zone_id = meta.registration.zone_id.clone();
        zones.insert(
            zone_id,
            Arc::new(Mutex::new(ZoneRecord {
                meta,
                scores: ZoneScores::default(),
            })),
        );
        Ok(true)
    }

    /// Restores a persisted record, replacing any in-memory state.
    pub fn restore(&self, state: ZoneRecordState) -> Result<(), RegistrationError> {
        let meta = self.resolve_meta(state.registration)?;
        let scores = ZoneScores {
            layer_scores: CategoryScores::from_map(&state.layer_scores),
            composite_score: state.composite_score,
            last_tick_composite: state.last_tick_composite,
            trend: state.trend,
            convergence_level: state.convergence_level,
            last_computed_tick: state.last_computed_tick,
        };
        let zone_id = meta.registration.zone_id.clone();
        self.zones
            .write()
            .insert(zone_id, Arc::new(Mutex::new(ZoneRecord { meta, scores })));
        Ok(())
    }

    pub fn contains(&self, zone_id: &str) -> bool {
        self.zones.read().contains_key(zone_id)
    }

    pub fn room_count(&self, zone_id: &str) -> Option<u32> {
        self.entry(zone_id).map(|zone| zone.lock().meta.room_count())
    }

    /// Zone ids in ascending order, the order every tick processes them in.
    pub fn zone_ids(&self) -> Vec<String> {
        self.zones.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }

    /// Copy-on-read snapshot used by the tick.
    pub fn snapshot(&self, zone_id: &str) -> Option<ZoneRecord> {
        self.entry(zone_id).map(|zone| zone.lock().clone())
    }

    pub fn view(&self, zone_id: &str) -> Option<ZoneStateView> {
        self.entry(zone_id).map(|zone| zone.lock().view())
    }

    /// Bounded upward nudge of one layer score from ingestion.
    pub fn nudge(&self, zone_id: &str, category: Category, points: f64, max_nudge: f64) {
        let Some(zone) = self.entry(zone_id) else {
            return;
        };
        let step = points.clamp(0.0, max_nudge);
        let mut record = zone.lock();
        let current = record.scores.layer_scores.get(category);
        record
            .scores
            .layer_scores
            .set(category, (current + step).clamp(0.0, MAX_SCORE));
    }

    /// Replaces the computed scores of a zone. Metadata stays as registered.
    pub fn commit(&self, zone_id: &str, scores: ZoneScores) -> bool {
        match self.entry(zone_id) {
            Some(zone) => {
                zone.lock().scores = scores;
                true
            }
            None => false,
        }
    }

    pub fn records(&self) -> Vec<ZoneRecord> {
        let entries = self.zones.read().values().cloned().collect::<Vec<_>>();
        entries.iter().map(|zone| zone.lock().clone()).collect()
    }
}
