//! In-process facade over the simulation context with SQLite persistence, a
//! tokio scheduler driver and the HTTP surface.

mod dispatch;
mod driver;
mod persistence;
mod server;

use std::path::Path;
use std::sync::Arc;

use contracts::{
    Category, ConfigError, Finding, InstabilityConfig, MaintenanceReport, SignalPayload,
    TickReport, ZoneRegistration, ZoneStateView, SCHEMA_VERSION_V1,
};
use kernel_core::{
    CancelFlag, Clock, EmitError, RegistrationError, SimulationContext, SystemClock, TickEvent,
    ZoneNotFound,
};
use parking_lot::Mutex;
use persistence::{SqliteStore, ZoneDelta};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub use dispatch::BroadcastDispatcher;
pub use driver::{spawn_scheduler, SchedulerHandle, SchedulerIntervals};
pub use persistence::{PersistedZoneSummary, PersistenceError};
pub use server::{router, serve, serve_with_shutdown, AppState, ServerError};

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug)]
struct PersistenceState {
    store: SqliteStore,
    /// Highest finding sequence known to be stored.
    persisted_finding_sequence: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub schema_version: String,
    pub current_tick: u64,
    pub zone_count: usize,
    pub last_tick: Option<TickReport>,
    pub last_maintenance: Option<MaintenanceReport>,
    pub persistence_attached: bool,
    pub last_persistence_error: Option<String>,
}

#[derive(Debug)]
pub struct EngineApi {
    context: SimulationContext,
    dispatcher: Arc<BroadcastDispatcher>,
    persistence: Mutex<Option<PersistenceState>>,
    last_persistence_error: Mutex<Option<String>>,
}

impl EngineApi {
    pub fn from_config(config: InstabilityConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let dispatcher = Arc::new(BroadcastDispatcher::new(EVENT_CHANNEL_CAPACITY));
        let context = SimulationContext::new(config, clock)?.with_dispatcher(dispatcher.clone());
        Ok(Self {
            context,
            dispatcher,
            persistence: Mutex::new(None),
            last_persistence_error: Mutex::new(None),
        })
    }

    pub fn with_system_clock(config: InstabilityConfig) -> Result<Self, ConfigError> {
        Self::from_config(config, Arc::new(SystemClock))
    }

    pub fn attach_sqlite_store(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let store = SqliteStore::open(path)?;
        let persisted_finding_sequence = store.max_finding_sequence()?;
        *self.persistence.lock() = Some(PersistenceState {
            store,
            persisted_finding_sequence,
        });
        Ok(())
    }

    /// Loads zones, baselines and retained findings from the attached store.
    /// Returns the number of zones restored.
    pub fn restore_from_store(&self) -> Result<usize, PersistenceError> {
        let state = {
            let guard = self.persistence.lock();
            let Some(persistence) = guard.as_ref() else {
                return Err(PersistenceError::NotAttached);
            };
            persistence.store.load_state()?
        };
        let zones = state.zones.len();
        self.context
            .restore_state(state)
            .map_err(|err| PersistenceError::Schema(err.to_string()))?;
        info!(zones, "restored state from sqlite store");
        Ok(zones)
    }

    pub fn context(&self) -> &SimulationContext {
        &self.context
    }

    pub fn config(&self) -> &InstabilityConfig {
        self.context.config()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.dispatcher.subscribe()
    }

    /// Registers the zone and stores its row right away so a restart keeps it
    /// even before the first tick.
    pub fn register_zone(&self, registration: ZoneRegistration) -> Result<ZoneStateView, RegistrationError> {
        let zone_id = registration.zone_id.clone();
        self.context.register_zone(registration)?;
        self.flush_persistence_if_enabled();
        self.context
            .get_zone_state(&zone_id)
            .map_err(|ZoneNotFound(zone_id)| RegistrationError::InvalidZoneId(zone_id))
    }

    pub fn emit(
        &self,
        category: Category,
        zone_id: &str,
        severity: f64,
        payload: SignalPayload,
    ) -> Result<(), EmitError> {
        self.context.emit(category, zone_id, severity, payload)
    }

    pub fn get_zone_state(&self, zone_id: &str) -> Result<ZoneStateView, ZoneNotFound> {
        self.context.get_zone_state(zone_id)
    }

    pub fn list_zone_states(&self) -> Vec<ZoneStateView> {
        self.context.list_zone_states()
    }

    pub fn get_active_findings(&self, zone_id: Option<&str>) -> Vec<Finding> {
        self.context.get_active_findings(zone_id)
    }

    pub fn run_tick(&self, cancel: &CancelFlag) -> TickReport {
        let report = self.context.run_tick(cancel);
        self.flush_persistence_if_enabled();
        report
    }

    pub fn run_baseline_maintenance(&self) -> MaintenanceReport {
        let report = self.context.run_baseline_maintenance();
        if let Err(err) = self.prune_store(report.ran_at) {
            error!(error = %err, "sqlite maintenance failed");
            *self.last_persistence_error.lock() = Some(err.to_string());
        }
        report
    }

    /// Writes every zone, its baselines and any findings newer than the
    /// persisted cursor, one transaction per zone. The cursor only advances
    /// when every zone was written.
    pub fn flush_persistence_checked(&self) -> Result<(), PersistenceError> {
        let mut guard = self.persistence.lock();
        let Some(persistence) = guard.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };

        let state = self.context.export_state();
        let cursor = persistence.persisted_finding_sequence;
        let mut highest = cursor;

        for zone in &state.zones {
            let zone_id = zone.registration.zone_id.as_str();
            let baselines = state.baselines_for(zone_id).cloned().collect::<Vec<_>>();
            let findings = state
                .findings
                .iter()
                .filter(|finding| finding.sequence > cursor && finding.zone_id == zone_id)
                .cloned()
                .collect::<Vec<_>>();
            persistence.store.persist_zone(ZoneDelta {
                zone,
                baselines: &baselines,
                findings: &findings,
            })?;
            if let Some(last) = findings.last() {
                highest = highest.max(last.sequence);
            }
        }

        persistence.persisted_finding_sequence = highest;
        *self.last_persistence_error.lock() = None;
        Ok(())
    }

    pub fn last_persistence_error(&self) -> Option<String> {
        self.last_persistence_error.lock().clone()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            current_tick: self.context.current_tick(),
            zone_count: self.context.zone_ids().len(),
            last_tick: self.context.last_tick_report(),
            last_maintenance: self.context.last_maintenance_report(),
            persistence_attached: self.persistence.lock().is_some(),
            last_persistence_error: self.last_persistence_error(),
        }
    }

    /// Zone rows as stored in the attached database, independent of what this
    /// process has restored.
    pub fn stored_zones(&self) -> Result<Vec<PersistedZoneSummary>, PersistenceError> {
        let guard = self.persistence.lock();
        let Some(persistence) = guard.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };
        persistence.store.list_zones(self.context.now())
    }

    fn flush_persistence_if_enabled(&self) {
        if self.persistence.lock().is_none() {
            return;
        }

        if let Err(err) = self.flush_persistence_checked() {
            warn!(error = %err, "sqlite flush failed; retrying on next tick");
            *self.last_persistence_error.lock() = Some(err.to_string());
        }
    }

    fn prune_store(&self, now: u64) -> Result<(), PersistenceError> {
        let mut guard = self.persistence.lock();
        let Some(persistence) = guard.as_mut() else {
            return Ok(());
        };
        let cutoff = now.saturating_sub(self.config().baseline_stale_secs);
        let baselines = persistence.store.delete_stale_baselines(cutoff)?;
        let findings = persistence.store.delete_expired_findings(now)?;
        info!(baselines, findings, "pruned sqlite store");
        Ok(())
    }
}
