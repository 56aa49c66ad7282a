//! Tick sequencing: the ordered pipeline phases, the two recompute cadences
//! and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

use contracts::{MaintenanceReport, TickReport};
use serde::Serialize;

/// Pipeline phases of one zone within a tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Decay,
    RecomputeLayers,
    RecomputeComposite,
    AnomalyDetection,
    ConvergenceDetection,
    TrendUpdate,
    Dispatch,
}

pub const PHASE_ORDER: [Phase; 7] = [
    Phase::Decay,
    Phase::RecomputeLayers,
    Phase::RecomputeComposite,
    Phase::AnomalyDetection,
    Phase::ConvergenceDetection,
    Phase::TrendUpdate,
    Phase::Dispatch,
];

/// Shutdown request observed between zones. The zone in progress always
/// completes.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    Tick,
    BaselineMaintenance,
}

/// Cadence bookkeeping for the T1 recompute and T2 maintenance passes.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    tick_interval_secs: u64,
    baseline_interval_secs: u64,
    current_tick: u64,
    next_tick_at: Option<u64>,
    next_maintenance_at: Option<u64>,
    last_report: Option<TickReport>,
    last_maintenance: Option<MaintenanceReport>,
}

impl TickScheduler {
    pub fn new(tick_interval_secs: u64, baseline_interval_secs: u64) -> Self {
        Self {
            tick_interval_secs: tick_interval_secs.max(1),
            baseline_interval_secs: baseline_interval_secs.max(1),
            current_tick: 0,
            next_tick_at: None,
            next_maintenance_at: None,
            last_report: None,
            last_maintenance: None,
        }
    }

    /// Jobs due at `now`, tick before maintenance. The first call anchors both
    /// cadences at `now`. A late poll runs each job once and re-anchors rather
    /// than replaying every missed interval.
    pub fn due_jobs(&mut self, now: u64) -> Vec<ScheduledJob> {
        let mut jobs = Vec::new();

        let next_tick = *self
            .next_tick_at
            .get_or_insert(now.saturating_add(self.tick_interval_secs));
        if now >= next_tick {
            jobs.push(ScheduledJob::Tick);
            self.next_tick_at = Some(now.saturating_add(self.tick_interval_secs));
        }

        let next_maintenance = *self
            .next_maintenance_at
            .get_or_insert(now.saturating_add(self.baseline_interval_secs));
        if now >= next_maintenance {
            jobs.push(ScheduledJob::BaselineMaintenance);
            self.next_maintenance_at = Some(now.saturating_add(self.baseline_interval_secs));
        }

        jobs
    }

    /// Allocates the next tick number.
    pub fn begin_tick(&mut self) -> u64 {
        self.current_tick = self.current_tick.saturating_add(1);
        self.current_tick
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Resumes numbering after restored state.
    pub fn resume_from(&mut self, tick: u64) {
        self.current_tick = self.current_tick.max(tick);
    }

    pub fn finish_tick(&mut self, report: TickReport) {
        self.last_report = Some(report);
    }

    pub fn finish_maintenance(&mut self, report: MaintenanceReport) {
        self.last_maintenance = Some(report);
    }

    pub fn last_report(&self) -> Option<&TickReport> {
        self.last_report.as_ref()
    }

    pub fn last_maintenance(&self) -> Option<&MaintenanceReport> {
        self.last_maintenance.as_ref()
    }

    pub fn tick_interval_secs(&self) -> u64 {
        self.tick_interval_secs
    }

    pub fn baseline_interval_secs(&self) -> u64 {
        self.baseline_interval_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_poll_only_anchors_cadences() {
        let mut scheduler = TickScheduler::new(60, 3_600);
        assert!(scheduler.due_jobs(1_000).is_empty());
        assert!(scheduler.due_jobs(1_059).is_empty());
        assert_eq!(scheduler.due_jobs(1_060), vec![ScheduledJob::Tick]);
        assert!(scheduler.due_jobs(1_061).is_empty());
    }

    #[test]
    fn maintenance_runs_on_slower_cadence_after_tick() {
        let mut scheduler = TickScheduler::new(60, 120);
        scheduler.due_jobs(0);
        assert_eq!(scheduler.due_jobs(60), vec![ScheduledJob::Tick]);
        assert_eq!(
            scheduler.due_jobs(120),
            vec![ScheduledJob::Tick, ScheduledJob::BaselineMaintenance]
        );
    }

    #[test]
    fn late_poll_runs_each_job_once() {
        let mut scheduler = TickScheduler::new(10, 1_000);
        scheduler.due_jobs(0);
        assert_eq!(scheduler.due_jobs(95), vec![ScheduledJob::Tick]);
        assert!(scheduler.due_jobs(100).is_empty());
        assert_eq!(scheduler.due_jobs(105), vec![ScheduledJob::Tick]);
    }

    #[test]
    fn tick_numbers_are_monotonic_and_resumable() {
        let mut scheduler = TickScheduler::new(1, 1);
        assert_eq!(scheduler.begin_tick(), 1);
        assert_eq!(scheduler.begin_tick(), 2);
        scheduler.resume_from(10);
        assert_eq!(scheduler.begin_tick(), 11);
        scheduler.resume_from(3);
        assert_eq!(scheduler.current_tick(), 11);
    }

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_requested());
        flag.request();
        assert!(flag.is_requested());
        flag.reset();
        assert!(!flag.is_requested());
    }

    #[test]
    fn phase_order_starts_with_decay_and_ends_with_dispatch() {
        assert_eq!(PHASE_ORDER.first(), Some(&Phase::Decay));
        assert_eq!(PHASE_ORDER.last(), Some(&Phase::Dispatch));
    }
}
