use super::*;

use contracts::{BaselineRecord, ZoneRecordState};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::anomaly::Baseline;

/// Durable slice of a context: zones, baselines and retained findings.
/// Windows are not persisted; they refill from live signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub zones: Vec<ZoneRecordState>,
    pub baselines: Vec<BaselineRecord>,
    pub findings: Vec<Finding>,
}

impl PersistedState {
    pub fn baselines_for<'a>(&'a self, zone_id: &'a str) -> impl Iterator<Item = &'a BaselineRecord> {
        self.baselines
            .iter()
            .filter(move |record| record.zone_id == zone_id)
    }
}

impl SimulationContext {
    pub fn export_state(&self) -> PersistedState {
        PersistedState {
            zones: self
                .registry
                .records()
                .iter()
                .map(|record| record.to_state())
                .collect(),
            baselines: self.detector.records(),
            findings: self.findings.since(0),
        }
    }

    /// Loads persisted state. Zones are restored first so baselines can be
    /// attached to them; baselines for unknown zones are dropped. Tick
    /// numbering resumes after the newest computed tick.
    pub fn restore_state(&self, state: PersistedState) -> Result<(), RegistrationError> {
        let mut resume_tick = 0;
        for zone in state.zones {
            let zone_id = zone.registration.zone_id.clone();
            resume_tick = resume_tick.max(zone.last_computed_tick.unwrap_or(0));
            self.registry.restore(zone)?;
            self.bus.ensure_zone(&zone_id);
        }

        let mut dropped = 0usize;
        for record in &state.baselines {
            if !self.registry.contains(&record.zone_id) {
                dropped += 1;
                continue;
            }
            self.detector
                .insert(&record.zone_id, record.category, Baseline::from(record));
        }
        if dropped > 0 {
            warn!(dropped, "baselines for unregistered zones were not restored");
        }

        let findings = state.findings.len();
        self.findings.restore(state.findings);
        self.scheduler.lock().resume_from(resume_tick);
        info!(
            zones = self.registry.len(),
            baselines = self.detector.pair_count(),
            findings,
            resume_tick,
            "state restored"
        );
        Ok(())
    }
}
