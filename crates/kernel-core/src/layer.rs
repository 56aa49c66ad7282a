//! Per-category layer accumulators.
//!
//! Each accumulator owns one category across every zone. A zone's window keeps
//! its contributions sorted by `(timestamp, units)`; contributions are
//! fixed-point units so the windowed sum is exact. Eviction always removes the
//! smallest entry in that order, so the surviving set depends only on which
//! signals arrived, never on the order they arrived in.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use contracts::Category;
use parking_lot::{Mutex, RwLock};

/// Fixed-point units per unit of weighted severity.
pub const UNITS_PER_SEVERITY: f64 = 10_000.0;

pub const MAX_SCORE: f64 = 100.0;

/// Ordered by timestamp, then units. Field order matters for the derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Contribution {
    pub timestamp: u64,
    pub units: u64,
}

impl Contribution {
    /// Converts a weighted severity into fixed-point units.
    pub fn from_weighted(timestamp: u64, severity: f64, route_weight: f64) -> Self {
        let weighted = (severity * route_weight * UNITS_PER_SEVERITY).round();
        let units = if weighted.is_finite() && weighted > 0.0 {
            weighted as u64
        } else {
            0
        };
        Self { timestamp, units }
    }
}

/// Copy of a window taken by the tick at the start of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSnapshot {
    pub total_units: u64,
    pub contributions: usize,
    /// Signals appended since the previous tick drained the window.
    pub observations: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LayerWindow {
    entries: VecDeque<Contribution>,
    total_units: u64,
    pending_observations: u64,
    capacity_evictions: u64,
}

impl LayerWindow {
    /// Appends first, then enforces the capacity cap by evicting the oldest.
    /// Among equal timestamps the smallest contribution goes first.
    pub fn append(&mut self, contribution: Contribution, capacity: usize) {
        let position = self
            .entries
            .iter()
            .rposition(|entry| *entry <= contribution)
            .map_or(0, |idx| idx + 1);
        self.entries.insert(position, contribution);
        self.total_units = self.total_units.saturating_add(contribution.units);
        self.pending_observations = self.pending_observations.saturating_add(1);

        while self.entries.len() > capacity.max(1) {
            if let Some(evicted) = self.entries.pop_front() {
                self.total_units = self.total_units.saturating_sub(evicted.units);
                self.capacity_evictions += 1;
            }
        }
    }

    /// Drops every contribution stamped before `cutoff`.
    pub fn evict_before(&mut self, cutoff: u64) -> usize {
        let mut evicted = 0;
        while let Some(front) = self.entries.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.total_units = self.total_units.saturating_sub(front.units);
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity_evictions(&self) -> u64 {
        self.capacity_evictions
    }

    fn drain_snapshot(&mut self) -> WindowSnapshot {
        let observations = std::mem::take(&mut self.pending_observations);
        WindowSnapshot {
            total_units: self.total_units,
            contributions: self.entries.len(),
            observations,
        }
    }
}

/// Score for a windowed unit total, normalised per room and clamped.
pub fn score_from_units(total_units: u64, room_count: u32, points_per_severity: f64) -> f64 {
    let rooms = f64::from(room_count.max(1));
    let weighted = total_units as f64 / UNITS_PER_SEVERITY;
    (weighted * points_per_severity / rooms).clamp(0.0, MAX_SCORE)
}

#[derive(Debug)]
pub struct LayerAccumulator {
    category: Category,
    horizon_secs: u64,
    capacity: usize,
    points_per_severity: f64,
    windows: RwLock<BTreeMap<String, Arc<Mutex<LayerWindow>>>>,
}

impl LayerAccumulator {
    pub fn new(
        category: Category,
        horizon_secs: u64,
        capacity: usize,
        points_per_severity: f64,
    ) -> Self {
        Self {
            category,
            horizon_secs,
            capacity,
            points_per_severity,
            windows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn ensure_zone(&self, zone_id: &str) {
        if self.windows.read().contains_key(zone_id) {
            return;
        }
        self.windows
            .write()
            .entry(zone_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LayerWindow::default())));
    }

    fn window(&self, zone_id: &str) -> Option<Arc<Mutex<LayerWindow>>> {
        self.windows.read().get(zone_id).cloned()
    }

    /// Ingestion path: append only. Returns false for an unknown zone.
    pub fn append(&self, zone_id: &str, contribution: Contribution) -> bool {
        let Some(window) = self.window(zone_id) else {
            return false;
        };
        window.lock().append(contribution, self.capacity);
        true
    }

    /// Evicts contributions older than the horizon and drains the observation
    /// counter, returning a copy of the window as it stood afterwards.
    pub fn decay(&self, zone_id: &str, now: u64) -> WindowSnapshot {
        let Some(window) = self.window(zone_id) else {
            return WindowSnapshot::default();
        };
        let cutoff = now.saturating_sub(self.horizon_secs);
        let mut guard = window.lock();
        guard.evict_before(cutoff);
        guard.drain_snapshot()
    }

    /// Returns drained observations to a window after a failed zone so the
    /// next tick still counts them.
    pub fn restore_observations(&self, zone_id: &str, observations: u64) {
        if observations == 0 {
            return;
        }
        if let Some(window) = self.window(zone_id) {
            let mut guard = window.lock();
            guard.pending_observations = guard.pending_observations.saturating_add(observations);
        }
    }

    /// Current windowed score without evicting.
    pub fn score(&self, zone_id: &str, room_count: u32) -> f64 {
        let units = self
            .window(zone_id)
            .map(|window| window.lock().total_units())
            .unwrap_or(0);
        score_from_units(units, room_count, self.points_per_severity)
    }

    pub fn points_for(&self, contribution: &Contribution, room_count: u32) -> f64 {
        score_from_units(contribution.units, room_count, self.points_per_severity)
    }

    pub fn window_len(&self, zone_id: &str) -> usize {
        self.window(zone_id)
            .map(|window| window.lock().len())
            .unwrap_or(0)
    }
}
