use super::*;

use contracts::{CategoryScores, FindingKind, Tier, ZoneFailure};
use tracing::warn;

use crate::anomaly::{Evaluation, ZoneBaselines};
use crate::convergence::ConvergenceState;
use crate::dispatch::TickEvent;
use crate::error::{ComputationError, PhaseError};
use crate::findings::FindingDraft;
use crate::layer::{score_from_units, WindowSnapshot};
use crate::scheduler::Phase;
use crate::zone::{compute_composite, trend_between, weighted_sum, ZoneRecord, ZoneScores};

/// Everything one zone's pipeline produced, staged until the zone succeeds.
#[derive(Debug)]
struct ZoneOutcome {
    scores: ZoneScores,
    previous_tier: Tier,
    baselines: ZoneBaselines,
    anomalies: Vec<Evaluation>,
    convergence: ConvergenceState,
}

fn ensure_finite(value: f64, phase: Phase, what: &str) -> Result<f64, PhaseError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PhaseError::new(
            phase,
            ComputationError::NonFiniteScore {
                what: what.to_string(),
            },
        ))
    }
}

impl SimulationContext {
    /// One T1 pass over every zone in ascending id order. A failing zone keeps
    /// its previous state and the pass moves on; cancellation is honoured
    /// between zones only.
    pub fn run_tick(&self, cancel: &CancelFlag) -> TickReport {
        let tick = self.scheduler.lock().begin_tick();
        let now = self.clock.now();
        let zone_ids = self.registry.zone_ids();
        debug!(tick, now, zones = zone_ids.len(), "tick started");

        let mut report = TickReport {
            tick,
            started_at: now,
            ..TickReport::default()
        };

        for zone_id in &zone_ids {
            if cancel.is_requested() {
                report.cancelled = true;
                report.zones_skipped += 1;
                continue;
            }

            match self.process_zone(zone_id, tick, now) {
                Ok(findings) => {
                    report.zones_processed += 1;
                    report.findings_emitted += findings;
                }
                Err(err) => {
                    warn!(tick, zone_id = %zone_id, phase = ?err.phase, error = %err.source, "zone computation failed");
                    report.failures.push(ZoneFailure {
                        zone_id: zone_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            tick,
            processed = report.zones_processed,
            skipped = report.zones_skipped,
            failed = report.failures.len(),
            findings = report.findings_emitted,
            cancelled = report.cancelled,
            "tick finished"
        );
        self.scheduler.lock().finish_tick(report.clone());
        report
    }

    /// Returns the number of findings recorded for the zone.
    fn process_zone(&self, zone_id: &str, tick: u64, now: u64) -> Result<usize, PhaseError> {
        let record = self
            .registry
            .snapshot(zone_id)
            .ok_or_else(|| PhaseError::new(Phase::Decay, ComputationError::ZoneVanished))?;
        let windows = self.bus.decay_zone(zone_id, now);
        let prior = self.detector.snapshot(zone_id);

        let outcome = match self.compute_zone(&record, &windows, &prior, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.bus.restore_observations(zone_id, &windows);
                return Err(err);
            }
        };

        if let Err(err) = self.commit_zone(zone_id, &outcome, tick) {
            self.bus.restore_observations(zone_id, &windows);
            return Err(err);
        }
        Ok(self.dispatch_zone(zone_id, outcome, tick, now))
    }

    fn compute_zone(
        &self,
        record: &ZoneRecord,
        windows: &[WindowSnapshot; 7],
        prior: &ZoneBaselines,
        now: u64,
    ) -> Result<ZoneOutcome, PhaseError> {
        let room_count = record.meta.room_count();
        let zone_id = record.meta.registration.zone_id.as_str();

        let mut layer_scores = CategoryScores::default();
        for category in Category::ALL {
            let score = score_from_units(
                windows[category.index()].total_units,
                room_count,
                self.config.points_per_severity,
            );
            let score = ensure_finite(score, Phase::RecomputeLayers, category.as_str())?;
            layer_scores.set(category, score);
        }

        let raw = ensure_finite(
            weighted_sum(&layer_scores, &record.meta.weights),
            Phase::RecomputeComposite,
            "weighted sum",
        )?;

        let mut baselines = ZoneBaselines::new();
        let mut evaluations = Vec::new();
        for category in Category::ALL {
            let observations = windows[category.index()].observations;
            if observations == 0 {
                continue;
            }
            let observed = observations as f64;
            let previous = prior.get(&category);
            let evaluation = self
                .detector
                .evaluate(category, observed, previous)
                .map_err(|source| PhaseError::new(Phase::AnomalyDetection, source))?;
            let mut updated = previous.copied().unwrap_or_default();
            updated.update(observed, now);
            baselines.insert(category, updated);
            evaluations.push(evaluation);
        }

        let z_scores = evaluations
            .iter()
            .map(|evaluation| (evaluation.category, evaluation.z_score))
            .collect::<Vec<_>>();
        let convergence = self.convergence.detect(zone_id, &z_scores);

        let composite = ensure_finite(
            compute_composite(raw, convergence.multiplier),
            Phase::RecomputeComposite,
            "composite",
        )?;

        let previous_composite = record.scores.composite_score;
        let scores = ZoneScores {
            layer_scores,
            composite_score: composite,
            last_tick_composite: previous_composite,
            trend: trend_between(previous_composite, composite, self.config.trend_epsilon),
            convergence_level: convergence.level,
            last_computed_tick: None,
        };

        Ok(ZoneOutcome {
            scores,
            previous_tier: record.scores.tier(),
            baselines,
            anomalies: evaluations
                .into_iter()
                .filter(|evaluation| evaluation.severity.is_some())
                .collect(),
            convergence,
        })
    }

    fn commit_zone(&self, zone_id: &str, outcome: &ZoneOutcome, tick: u64) -> Result<(), PhaseError> {
        let mut scores = outcome.scores.clone();
        scores.last_computed_tick = Some(tick);
        if !self.registry.commit(zone_id, scores) {
            return Err(PhaseError::new(Phase::TrendUpdate, ComputationError::ZoneVanished));
        }
        self.detector.commit(zone_id, outcome.baselines.clone());
        Ok(())
    }

    fn dispatch_zone(&self, zone_id: &str, outcome: ZoneOutcome, tick: u64, now: u64) -> usize {
        let tier = outcome.scores.tier();
        if tier != outcome.previous_tier {
            debug!(tick, zone_id = %zone_id, from = ?outcome.previous_tier, to = ?tier, "tier changed");
            self.dispatcher.dispatch(TickEvent::TierChanged {
                zone_id: zone_id.to_string(),
                tick,
                from: outcome.previous_tier,
                to: tier,
                composite_score: outcome.scores.composite_score,
            });
        }

        let mut drafts = Vec::new();
        for evaluation in &outcome.anomalies {
            let (Some(z), Some(severity)) = (evaluation.z_score, evaluation.severity) else {
                continue;
            };
            drafts.push(FindingDraft {
                kind: FindingKind::Anomaly,
                zone_id: zone_id.to_string(),
                category: Some(evaluation.category),
                observed: evaluation.observed,
                baseline_mean: evaluation.baseline_mean,
                z_score: z,
                severity,
                message: format!(
                    "{} signals observed: {} against baseline mean {:.2} (z = {:.2})",
                    evaluation.category, evaluation.observed, evaluation.baseline_mean, z
                ),
                tick,
                timestamp: now,
            });
        }

        if let Some(severity) = outcome.convergence.severity() {
            let peak_z = outcome
                .anomalies
                .iter()
                .filter_map(|evaluation| evaluation.z_score)
                .fold(self.config.convergence.z_threshold, f64::max);
            let elevated = outcome
                .convergence
                .elevated
                .iter()
                .map(|category| category.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            drafts.push(FindingDraft {
                kind: FindingKind::Convergence,
                zone_id: zone_id.to_string(),
                category: None,
                observed: outcome.convergence.elevated_category_count as f64,
                baseline_mean: 0.0,
                z_score: peak_z,
                severity,
                message: format!(
                    "convergence level {} across {} categories ({elevated}); multiplier {}",
                    outcome.convergence.level,
                    outcome.convergence.elevated_category_count,
                    outcome.convergence.multiplier
                ),
                tick,
                timestamp: now,
            });
        }

        let mut recorded = 0;
        for draft in drafts {
            if let Some(finding) = self.findings.record(draft) {
                recorded += 1;
                self.dispatcher.dispatch(TickEvent::FindingRecorded { finding });
            }
        }
        recorded
    }
}
