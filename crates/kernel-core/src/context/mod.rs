//! `SimulationContext`: the explicitly constructed owner of all zone, window,
//! baseline and finding state.
//!
//! External collaborators depend on three entry points only: [`SimulationContext::emit`],
//! [`SimulationContext::get_zone_state`] and [`SimulationContext::get_active_findings`].
//! The hosting application drives [`SimulationContext::run_tick`] and
//! [`SimulationContext::run_baseline_maintenance`], directly or via `run_due`.

mod maintenance;
mod state;
mod tick;

use std::sync::Arc;

use contracts::{
    Category, ConfigError, Finding, InstabilityConfig, MaintenanceReport, SignalPayload,
    TickReport, ZoneRegistration, ZoneStateView,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::anomaly::AnomalyDetector;
use crate::clock::Clock;
use crate::convergence::ConvergenceDetector;
use crate::dispatch::{Dispatcher, NullDispatcher};
use crate::error::{EmitError, RegistrationError, ZoneNotFound};
use crate::findings::FindingSink;
use crate::scheduler::{CancelFlag, ScheduledJob, TickScheduler};
use crate::signal::{validate_signal, Signal, SignalBus};
use crate::zone::{validate_zone_id, ZoneRegistry};

pub use state::PersistedState;

#[derive(Debug)]
pub struct SimulationContext {
    config: InstabilityConfig,
    clock: Arc<dyn Clock>,
    bus: SignalBus,
    registry: ZoneRegistry,
    detector: AnomalyDetector,
    convergence: ConvergenceDetector,
    findings: FindingSink,
    dispatcher: Arc<dyn Dispatcher>,
    scheduler: Mutex<TickScheduler>,
}

impl SimulationContext {
    pub fn new(config: InstabilityConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            bus: SignalBus::new(&config),
            registry: ZoneRegistry::new(config.weights),
            detector: AnomalyDetector::new(config.anomaly),
            convergence: ConvergenceDetector::new(config.convergence.clone()),
            findings: FindingSink::new(config.finding_ttl_secs),
            dispatcher: Arc::new(NullDispatcher),
            scheduler: Mutex::new(TickScheduler::new(
                config.tick_interval_secs,
                config.baseline_interval_secs,
            )),
            clock,
            config,
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &InstabilityConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Idempotent. Re-registration replaces metadata and keeps scores,
    /// windows and baselines.
    pub fn register_zone(&self, registration: ZoneRegistration) -> Result<(), RegistrationError> {
        let zone_id = registration.zone_id.clone();
        let room_count = registration.room_count;
        validate_zone_id(&zone_id)?;
        // Windows exist before the zone becomes visible to `emit`.
        self.bus.ensure_zone(&zone_id);
        let created = self.registry.register(registration)?;
        if created {
            info!(zone_id = %zone_id, room_count, "zone registered");
        } else {
            debug!(zone_id = %zone_id, room_count, "zone metadata updated");
        }
        Ok(())
    }

    /// Ingestion entry point. Nudges the zone's layer score, then appends the
    /// signal to its window; never touches state a running tick depends on.
    pub fn emit(
        &self,
        category: Category,
        zone_id: &str,
        severity: f64,
        payload: SignalPayload,
    ) -> Result<(), EmitError> {
        let signal = Signal::new(category, zone_id, severity, self.clock.now(), payload);
        self.ingest(signal)
    }

    /// Ingests a signal that already carries its timestamp.
    pub fn ingest(&self, signal: Signal) -> Result<(), EmitError> {
        let result = self.ingest_inner(&signal);
        if let Err(err) = &result {
            debug!(
                zone_id = %signal.zone_id,
                category = %signal.category,
                error = %err,
                "signal rejected"
            );
        }
        result
    }

    fn ingest_inner(&self, signal: &Signal) -> Result<(), EmitError> {
        let Some(room_count) = self.registry.room_count(&signal.zone_id) else {
            return Err(EmitError::UnknownZone(signal.zone_id.clone()));
        };
        validate_signal(signal)?;
        let contribution = self.bus.route(signal)?;
        let points = self.bus.points_for(signal.category, &contribution, room_count);
        // Nudge before the append: a tick committing in between overwrites the
        // nudge and counts the signal on its next pass, never twice.
        self.registry
            .nudge(&signal.zone_id, signal.category, points, self.config.max_nudge);
        self.bus.append(signal, contribution)
    }

    pub fn get_zone_state(&self, zone_id: &str) -> Result<ZoneStateView, ZoneNotFound> {
        self.registry
            .view(zone_id)
            .ok_or_else(|| ZoneNotFound(zone_id.to_string()))
    }

    /// Every zone's view, ordered by zone id.
    pub fn list_zone_states(&self) -> Vec<ZoneStateView> {
        self.registry
            .records()
            .iter()
            .map(|record| record.view())
            .collect()
    }

    /// Unexpired findings, most recent first.
    pub fn get_active_findings(&self, zone_id: Option<&str>) -> Vec<Finding> {
        self.findings.active(zone_id, self.clock.now())
    }

    pub fn findings_since(&self, sequence: u64) -> Vec<Finding> {
        self.findings.since(sequence)
    }

    pub fn zone_ids(&self) -> Vec<String> {
        self.registry.zone_ids()
    }

    pub fn current_tick(&self) -> u64 {
        self.scheduler.lock().current_tick()
    }

    pub fn last_tick_report(&self) -> Option<TickReport> {
        self.scheduler.lock().last_report().cloned()
    }

    pub fn last_maintenance_report(&self) -> Option<MaintenanceReport> {
        self.scheduler.lock().last_maintenance().cloned()
    }

    /// Runs whatever the cadences say is due at the clock's current time.
    pub fn run_due(&self, cancel: &CancelFlag) -> Vec<ScheduledJob> {
        let jobs = self.scheduler.lock().due_jobs(self.clock.now());
        for job in &jobs {
            match job {
                ScheduledJob::Tick => {
                    self.run_tick(cancel);
                }
                ScheduledJob::BaselineMaintenance => {
                    self.run_baseline_maintenance();
                }
            }
        }
        jobs
    }
}

#[cfg(test)]
mod tests;
