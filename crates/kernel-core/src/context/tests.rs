use super::*;

use contracts::{
    BaselineRecord, CategoryScores, CyberKind, EconomyKind, EnvironmentKind, FactionKind, FindingKind,
    FindingSeverity, InfrastructureKind, PopulationKind, SecurityKind, Tier, Trend,
};

use crate::anomaly::Baseline;
use crate::clock::ManualClock;
use crate::dispatch::{RecordingDispatcher, TickEvent};
use crate::zone::weighted_sum;

fn payload(category: Category) -> SignalPayload {
    match category {
        Category::Security => SignalPayload::Security {
            kind: SecurityKind::Theft,
            actors: 1,
        },
        Category::Infrastructure => SignalPayload::Infrastructure {
            kind: InfrastructureKind::PowerFailure,
            rooms_affected: 1,
        },
        Category::Faction => SignalPayload::Faction {
            kind: FactionKind::Skirmish,
            factions: vec!["reds".to_string()],
        },
        Category::Environment => SignalPayload::Environment {
            kind: EnvironmentKind::Hazard,
            intensity: 0.5,
        },
        Category::Economy => SignalPayload::Economy {
            kind: EconomyKind::Shortage,
            amount: 10,
        },
        Category::Population => SignalPayload::Population {
            kind: PopulationKind::Injury,
            headcount: 1,
        },
        Category::Cyber => SignalPayload::Cyber {
            kind: CyberKind::Intrusion,
            node: None,
        },
    }
}

fn context() -> (SimulationContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let ctx = SimulationContext::new(InstabilityConfig::default(), clock.clone())
        .expect("default config is valid");
    (ctx, clock)
}

fn register(ctx: &SimulationContext, zone_id: &str, rooms: u32) {
    ctx.register_zone(ZoneRegistration::new(zone_id, zone_id, "district", rooms))
        .expect("register");
}

fn emit_n(ctx: &SimulationContext, zone_id: &str, category: Category, severity: f64, n: usize) {
    for _ in 0..n {
        ctx.emit(category, zone_id, severity, payload(category))
            .expect("emit");
    }
}

#[test]
fn zero_signal_zone_stays_at_rest() {
    let (ctx, _) = context();
    register(&ctx, "quiet", 4);
    let report = ctx.run_tick(&CancelFlag::new());

    assert_eq!(report.tick, 1);
    assert_eq!(report.zones_processed, 1);
    let state = ctx.get_zone_state("quiet").expect("zone");
    assert_eq!(state.composite_score, 0.0);
    assert!(state.layer_scores.values().all(|score| *score == 0.0));
    assert_eq!(state.tier, Tier::Stable);
    assert_eq!(state.convergence_level, 0);
    assert_eq!(state.trend, Trend::Stable);
    assert_eq!(state.last_computed_tick, Some(1));
    assert!(ctx.get_active_findings(None).is_empty());
}

#[test]
fn emit_validates_zone_then_severity_then_payload() {
    let (ctx, _) = context();
    register(&ctx, "z", 1);

    assert_eq!(
        ctx.emit(Category::Security, "nowhere", 2.0, payload(Category::Security)),
        Err(EmitError::UnknownZone("nowhere".to_string()))
    );
    assert_eq!(
        ctx.emit(Category::Security, "z", 1.5, payload(Category::Security)),
        Err(EmitError::InvalidSeverity(1.5))
    );
    assert!(matches!(
        ctx.emit(Category::Security, "z", 0.5, payload(Category::Cyber)),
        Err(EmitError::InvalidPayload(_))
    ));

    let state = ctx.get_zone_state("z").expect("zone");
    assert_eq!(state.layer_scores[&Category::Security], 0.0);
}

#[test]
fn emit_nudges_layer_score_before_any_tick() {
    let (ctx, _) = context();
    register(&ctx, "z", 1);
    ctx.emit(Category::Cyber, "z", 0.2, payload(Category::Cyber))
        .expect("emit");

    // 0.2 severity * 1.0 weight * 20 points, under the 10 point bound.
    let state = ctx.get_zone_state("z").expect("zone");
    assert!((state.layer_scores[&Category::Cyber] - 4.0).abs() < 1e-9);
    assert_eq!(state.last_computed_tick, None);
}

#[test]
fn get_zone_state_reports_missing_zone() {
    let (ctx, _) = context();
    assert_eq!(
        ctx.get_zone_state("ghost"),
        Err(ZoneNotFound("ghost".to_string()))
    );
}

#[test]
fn security_spike_against_quiet_baseline_is_critical() {
    let (ctx, _) = context();
    register(&ctx, "sector_7", 12);
    ctx.detector.insert(
        "sector_7",
        Category::Security,
        Baseline::from_moments(30, 2.3, 0.35, 900),
    );

    emit_n(&ctx, "sector_7", Category::Security, 0.6, 8);
    let report = ctx.run_tick(&CancelFlag::new());
    assert_eq!(report.findings_emitted, 1);

    let findings = ctx.get_active_findings(Some("sector_7"));
    assert_eq!(findings.len(), 1);
    let finding = &findings[0];
    assert_eq!(finding.kind, FindingKind::Anomaly);
    assert_eq!(finding.category, Some(Category::Security));
    assert_eq!(finding.severity, FindingSeverity::Critical);
    assert_eq!(finding.observed, 8.0);
    assert_eq!(finding.baseline_mean, 2.3);
    assert!((finding.z_score - 9.63).abs() < 0.05);

    let baseline = ctx
        .detector
        .get("sector_7", Category::Security)
        .expect("baseline");
    assert_eq!(baseline.count, 31);
}

#[test]
fn first_observation_only_seeds_baseline() {
    let (ctx, _) = context();
    register(&ctx, "z", 1);
    emit_n(&ctx, "z", Category::Economy, 0.3, 50);
    ctx.run_tick(&CancelFlag::new());

    assert!(ctx.get_active_findings(None).is_empty());
    let baseline = ctx.detector.get("z", Category::Economy).expect("seeded");
    assert_eq!(baseline.count, 1);
    assert_eq!(baseline.mean, 50.0);
}

#[test]
fn three_converging_categories_apply_multiplier() {
    let (ctx, _) = context();
    register(&ctx, "z", 10);
    let converging = [Category::Security, Category::Faction, Category::Cyber];
    for category in converging {
        ctx.detector
            .insert("z", category, Baseline::from_moments(10, 1.0, 1.0, 900));
        emit_n(&ctx, "z", category, 0.5, 4);
    }

    let report = ctx.run_tick(&CancelFlag::new());
    let state = ctx.get_zone_state("z").expect("zone");
    assert_eq!(state.convergence_level, 1);

    let layers = CategoryScores::from_map(&state.layer_scores);
    let raw = weighted_sum(&layers, &ctx.config().weights);
    assert!((state.composite_score - raw * 1.15).abs() < 1e-9);

    let findings = ctx.get_active_findings(Some("z"));
    assert_eq!(report.findings_emitted, 4);
    let convergence = findings
        .iter()
        .find(|finding| finding.kind == FindingKind::Convergence)
        .expect("convergence finding");
    assert_eq!(convergence.category, None);
    assert_eq!(convergence.observed, 3.0);
    assert_eq!(convergence.severity, FindingSeverity::Elevated);
}

#[test]
fn failing_zone_keeps_last_good_state_and_others_proceed() {
    let (ctx, _) = context();
    register(&ctx, "a", 1);
    register(&ctx, "b", 1);
    ctx.detector.insert(
        "a",
        Category::Security,
        Baseline {
            count: 4,
            mean: 1.0,
            m2: -1.0,
            last_observed_at: 0,
        },
    );
    emit_n(&ctx, "a", Category::Security, 0.5, 2);
    emit_n(&ctx, "b", Category::Security, 0.5, 2);

    let before = ctx.get_zone_state("a").expect("zone");
    let report = ctx.run_tick(&CancelFlag::new());

    assert_eq!(report.zones_processed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].zone_id, "a");
    assert!(report.failures[0].error.contains("AnomalyDetection"));
    assert_eq!(ctx.get_zone_state("a").expect("zone"), before);
    assert_eq!(
        ctx.get_zone_state("b").expect("zone").last_computed_tick,
        Some(1)
    );

    // The failed zone's observations are still counted once the baseline is fixed.
    ctx.detector
        .insert("a", Category::Security, Baseline::from_moments(4, 1.0, 1.0, 0));
    let report = ctx.run_tick(&CancelFlag::new());
    assert!(report.failures.is_empty());
    let baseline = ctx.detector.get("a", Category::Security).expect("baseline");
    assert_eq!(baseline.count, 5);
}

#[test]
fn cancellation_skips_remaining_zones() {
    let (ctx, _) = context();
    for zone in ["a", "b", "c"] {
        register(&ctx, zone, 1);
    }
    let cancel = CancelFlag::new();
    cancel.request();

    let report = ctx.run_tick(&cancel);
    assert!(report.cancelled);
    assert_eq!(report.zones_processed, 0);
    assert_eq!(report.zones_skipped, 3);
    assert_eq!(ctx.last_tick_report(), Some(report));
}

#[test]
fn tier_change_is_dispatched() {
    let clock = Arc::new(ManualClock::new(0));
    let recorder = Arc::new(RecordingDispatcher::default());
    let ctx = SimulationContext::new(InstabilityConfig::default(), clock)
        .expect("config")
        .with_dispatcher(recorder.clone());
    register(&ctx, "hot", 1);
    for category in Category::ALL {
        emit_n(&ctx, "hot", category, 1.0, 6);
    }

    ctx.run_tick(&CancelFlag::new());
    let state = ctx.get_zone_state("hot").expect("zone");
    assert_eq!(state.tier, Tier::Emergency);
    assert_eq!(state.trend, Trend::Rising);

    let events = recorder.take();
    assert!(events.iter().any(|event| matches!(
        event,
        TickEvent::TierChanged {
            from: Tier::Stable,
            to: Tier::Emergency,
            ..
        }
    )));
}

#[test]
fn composite_falls_once_signals_leave_the_horizon() {
    let (ctx, clock) = context();
    register(&ctx, "z", 1);
    emit_n(&ctx, "z", Category::Faction, 1.0, 3);
    ctx.run_tick(&CancelFlag::new());
    let risen = ctx.get_zone_state("z").expect("zone");
    assert_eq!(risen.trend, Trend::Rising);

    ctx.run_tick(&CancelFlag::new());
    assert_eq!(ctx.get_zone_state("z").expect("zone").trend, Trend::Stable);

    clock.advance(ctx.config().horizon_secs + 1);
    ctx.run_tick(&CancelFlag::new());
    let fallen = ctx.get_zone_state("z").expect("zone");
    assert_eq!(fallen.trend, Trend::Falling);
    assert_eq!(fallen.composite_score, 0.0);
}

#[test]
fn register_twice_leaves_scores_and_baselines_unchanged() {
    let (ctx, _) = context();
    register(&ctx, "z", 2);
    emit_n(&ctx, "z", Category::Population, 0.5, 3);
    ctx.run_tick(&CancelFlag::new());

    let state = ctx.get_zone_state("z").expect("zone");
    let baselines = ctx.detector.records_for("z");
    register(&ctx, "z", 2);
    assert_eq!(ctx.get_zone_state("z").expect("zone"), state);
    assert_eq!(ctx.detector.records_for("z"), baselines);
}

#[test]
fn run_due_follows_cadences() {
    let (ctx, clock) = context();
    register(&ctx, "z", 1);
    let cancel = CancelFlag::new();

    assert!(ctx.run_due(&cancel).is_empty());
    clock.advance(60);
    assert_eq!(ctx.run_due(&cancel), vec![ScheduledJob::Tick]);
    assert_eq!(ctx.current_tick(), 1);
    clock.advance(3_600);
    assert_eq!(
        ctx.run_due(&cancel),
        vec![ScheduledJob::Tick, ScheduledJob::BaselineMaintenance]
    );
    assert!(ctx.last_maintenance_report().is_some());
}

#[test]
fn maintenance_prunes_stale_baselines_and_expired_findings() {
    let (ctx, clock) = context();
    register(&ctx, "sector_7", 1);
    ctx.detector.insert(
        "sector_7",
        Category::Security,
        Baseline::from_moments(30, 2.3, 0.35, 1_000),
    );
    emit_n(&ctx, "sector_7", Category::Security, 0.5, 8);
    ctx.run_tick(&CancelFlag::new());
    assert_eq!(ctx.get_active_findings(None).len(), 1);

    clock.advance(ctx.config().baseline_stale_secs + 1);
    let report = ctx.run_baseline_maintenance();
    assert_eq!(report.baselines_pruned, 1);
    assert_eq!(report.findings_pruned, 1);
    assert!(ctx.get_active_findings(None).is_empty());
    assert_eq!(ctx.detector.pair_count(), 0);
}

#[test]
fn export_and_restore_resume_numbering() {
    let (ctx, _) = context();
    register(&ctx, "z", 3);
    ctx.detector
        .insert("z", Category::Cyber, Baseline::from_moments(5, 2.0, 1.0, 900));
    emit_n(&ctx, "z", Category::Cyber, 0.5, 6);
    ctx.run_tick(&CancelFlag::new());
    ctx.run_tick(&CancelFlag::new());
    let exported = ctx.export_state();
    assert_eq!(exported.zones.len(), 1);
    assert_eq!(exported.baselines_for("z").count(), 1);

    let (restored, _) = context();
    let mut with_orphan = exported.clone();
    with_orphan.baselines.push(BaselineRecord {
        zone_id: "orphan".to_string(),
        category: Category::Economy,
        count: 2,
        mean: 1.0,
        m2: 0.5,
        last_observed_at: 0,
    });
    restored.restore_state(with_orphan).expect("restore");

    assert_eq!(restored.export_state(), exported);
    assert_eq!(
        restored.get_zone_state("z").expect("zone"),
        ctx.get_zone_state("z").expect("zone")
    );
    assert_eq!(restored.run_tick(&CancelFlag::new()).tick, 3);
}

#[test]
fn tick_between_nudge_and_append_counts_signal_once() {
    let (ctx, _) = context();
    register(&ctx, "z", 1);

    // Replays `ingest_inner` with a tick landing between its two writes.
    let signal = Signal::new(Category::Cyber, "z", 0.2, ctx.now(), payload(Category::Cyber));
    let contribution = ctx.bus.route(&signal).expect("route");
    let points = ctx.bus.points_for(Category::Cyber, &contribution, 1);
    ctx.registry
        .nudge("z", Category::Cyber, points, ctx.config.max_nudge);
    ctx.run_tick(&CancelFlag::new());
    ctx.bus.append(&signal, contribution).expect("append");

    let after_tick = ctx.get_zone_state("z").expect("zone");
    assert_eq!(after_tick.layer_scores[&Category::Cyber], 0.0);

    ctx.run_tick(&CancelFlag::new());
    let next = ctx.get_zone_state("z").expect("zone");
    assert!((next.layer_scores[&Category::Cyber] - 4.0).abs() < 1e-9);
}
