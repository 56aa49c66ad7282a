use super::*;

impl SimulationContext {
    /// T2 pass: drops baselines with no recent observation and physically
    /// removes expired findings.
    pub fn run_baseline_maintenance(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let report = MaintenanceReport {
            ran_at: now,
            baselines_pruned: self
                .detector
                .prune_stale(now, self.config.baseline_stale_secs),
            findings_pruned: self.findings.prune_expired(now),
        };
        info!(
            now,
            baselines_pruned = report.baselines_pruned,
            findings_pruned = report.findings_pruned,
            baselines_kept = self.detector.pair_count(),
            "baseline maintenance finished"
        );
        self.scheduler.lock().finish_maintenance(report.clone());
        report
    }
}
