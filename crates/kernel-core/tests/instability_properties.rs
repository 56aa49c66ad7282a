use std::sync::Arc;

use contracts::{
    Category, CyberKind, EconomyKind, EnvironmentKind, FactionKind, InfrastructureKind,
    InstabilityConfig, PopulationKind, SecurityKind, SignalPayload, Tier, ZoneRegistration,
};
use kernel_core::anomaly::Baseline;
use kernel_core::convergence::ConvergenceDetector;
use kernel_core::{CancelFlag, ManualClock, SimulationContext};
use proptest::prelude::*;

fn payload(category: Category) -> SignalPayload {
    match category {
        Category::Security => SignalPayload::Security {
            kind: SecurityKind::Combat,
            actors: 3,
        },
        Category::Infrastructure => SignalPayload::Infrastructure {
            kind: InfrastructureKind::StructuralDamage,
            rooms_affected: 2,
        },
        Category::Faction => SignalPayload::Faction {
            kind: FactionKind::TerritoryClaim,
            factions: vec!["blues".to_string(), "greens".to_string()],
        },
        Category::Environment => SignalPayload::Environment {
            kind: EnvironmentKind::Storm,
            intensity: 0.7,
        },
        Category::Economy => SignalPayload::Economy {
            kind: EconomyKind::PriceShock,
            amount: 250,
        },
        Category::Population => SignalPayload::Population {
            kind: PopulationKind::Migration,
            headcount: 12,
        },
        Category::Cyber => SignalPayload::Cyber {
            kind: CyberKind::DataTheft,
            node: Some("relay-3".to_string()),
        },
    }
}

fn context_with_zone(zone_id: &str, rooms: u32) -> SimulationContext {
    let ctx = SimulationContext::new(InstabilityConfig::default(), Arc::new(ManualClock::new(500)))
        .expect("default config");
    ctx.register_zone(ZoneRegistration::new(zone_id, zone_id, "district", rooms))
        .expect("register");
    ctx
}

fn context_with_capacity(zone_id: &str, capacity: usize) -> SimulationContext {
    let config = InstabilityConfig {
        window_capacity: capacity,
        ..InstabilityConfig::default()
    };
    let ctx = SimulationContext::new(config, Arc::new(ManualClock::new(500))).expect("config");
    ctx.register_zone(ZoneRegistration::new(zone_id, zone_id, "district", 1))
        .expect("register");
    ctx
}

fn two_pass(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * b.abs().max(1.0)
}

#[test]
fn property_zero_signal_zone_is_stable_with_no_escalation() {
    let ctx = context_with_zone("empty", 8);
    ctx.run_tick(&CancelFlag::new());
    let state = ctx.get_zone_state("empty").expect("zone");
    assert_eq!(state.composite_score, 0.0);
    assert_eq!(state.tier, Tier::Stable);
    assert_eq!(state.convergence_level, 0);
    assert!(state.layer_scores.values().all(|score| *score == 0.0));
}

#[test]
fn property_tier_partition_boundaries() {
    assert_eq!(Tier::for_score(0.0), Tier::Stable);
    assert_eq!(Tier::for_score(20.0), Tier::Stable);
    assert_eq!(Tier::for_score(21.0), Tier::Elevated);
    assert_eq!(Tier::for_score(40.0), Tier::Elevated);
    assert_eq!(Tier::for_score(41.0), Tier::Unstable);
    assert_eq!(Tier::for_score(60.0), Tier::Unstable);
    assert_eq!(Tier::for_score(61.0), Tier::Critical);
    assert_eq!(Tier::for_score(80.0), Tier::Critical);
    assert_eq!(Tier::for_score(81.0), Tier::Emergency);
    assert_eq!(Tier::for_score(100.0), Tier::Emergency);
}

#[test]
fn property_convergence_level_mapping() {
    let detector = ConvergenceDetector::default();
    for (count, level) in [(2, 0), (3, 1), (4, 2), (5, 3), (7, 3)] {
        let z_scores = Category::ALL
            .iter()
            .take(count)
            .map(|category| (*category, Some(2.0)))
            .collect::<Vec<_>>();
        assert_eq!(detector.detect("z", &z_scores).level, level, "count {count}");
    }
}

#[test]
fn property_room_count_zero_scores_like_one_room() {
    let zero = context_with_zone("z", 0);
    let one = context_with_zone("z", 1);
    for ctx in [&zero, &one] {
        for _ in 0..2 {
            ctx.emit(Category::Cyber, "z", 0.4, payload(Category::Cyber))
                .expect("emit");
        }
        ctx.run_tick(&CancelFlag::new());
    }
    let zero_state = zero.get_zone_state("z").expect("zone");
    let one_state = one.get_zone_state("z").expect("zone");
    assert_eq!(zero_state.layer_scores, one_state.layer_scores);
    assert_eq!(zero_state.composite_score, one_state.composite_score);
    assert!(zero_state.composite_score.is_finite());
}

#[test]
fn property_full_window_keeps_heaviest_same_tick_signals() {
    let mut composites = Vec::new();
    for order in [[0.9, 0.1, 0.1], [0.1, 0.1, 0.9], [0.1, 0.9, 0.1]] {
        let ctx = context_with_capacity("z", 2);
        for severity in order {
            ctx.emit(Category::Security, "z", severity, payload(Category::Security))
                .expect("emit");
        }
        ctx.run_tick(&CancelFlag::new());
        composites.push(ctx.get_zone_state("z").expect("zone").composite_score);
    }
    // (0.9 + 0.1) * 1.5 combat weight * 20 points * 0.2 security weight.
    for composite in composites {
        assert!((composite - 6.0).abs() < 1e-9, "composite {composite}");
    }
}

proptest! {
    #[test]
    fn property_welford_matches_two_pass(
        values in prop::collection::vec((0_u32..200).prop_map(f64::from), 2..10_000)
    ) {
        let mut baseline = Baseline::default();
        for value in &values {
            baseline.update(*value, 0);
        }
        let (mean, variance) = two_pass(&values);
        prop_assert_eq!(baseline.count, values.len() as u64);
        prop_assert!(close(baseline.mean, mean), "mean {} vs {}", baseline.mean, mean);
        prop_assert!(
            close(baseline.variance(), variance),
            "variance {} vs {}",
            baseline.variance(),
            variance
        );
    }

    #[test]
    fn property_composite_invariant_under_signal_permutation(
        (signals, shuffled) in prop::collection::vec((0_usize..7, 0_u32..=1_000), 1..60)
            .prop_flat_map(|signals| {
                let shuffled = Just(signals.clone()).prop_shuffle();
                (Just(signals), shuffled)
            })
    ) {
        let forward = context_with_zone("z", 5);
        let permuted = context_with_zone("z", 5);
        for (ctx, batch) in [(&forward, &signals), (&permuted, &shuffled)] {
            for (idx, permille) in batch {
                let category = Category::ALL[*idx];
                let severity = f64::from(*permille) / 1_000.0;
                ctx.emit(category, "z", severity, payload(category)).expect("emit");
            }
            ctx.run_tick(&CancelFlag::new());
        }
        prop_assert_eq!(
            forward.get_zone_state("z").expect("zone"),
            permuted.get_zone_state("z").expect("zone")
        );
    }

    #[test]
    fn property_composite_invariant_under_permutation_at_capacity(
        capacity in 1_usize..6,
        (signals, shuffled) in prop::collection::vec((0_usize..3, 0_u32..=1_000), 1..40)
            .prop_flat_map(|signals| {
                let shuffled = Just(signals.clone()).prop_shuffle();
                (Just(signals), shuffled)
            })
    ) {
        let forward = context_with_capacity("z", capacity);
        let permuted = context_with_capacity("z", capacity);
        for (ctx, batch) in [(&forward, &signals), (&permuted, &shuffled)] {
            for (idx, permille) in batch {
                let category = Category::ALL[*idx];
                let severity = f64::from(*permille) / 1_000.0;
                ctx.emit(category, "z", severity, payload(category)).expect("emit");
            }
            ctx.run_tick(&CancelFlag::new());
        }
        prop_assert_eq!(
            forward.get_zone_state("z").expect("zone"),
            permuted.get_zone_state("z").expect("zone")
        );
    }

    #[test]
    fn property_tier_is_total_and_monotonic(a in -50.0_f64..150.0, b in -50.0_f64..150.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(Tier::for_score(low) <= Tier::for_score(high));
    }

    #[test]
    fn property_scores_stay_within_bounds(
        loads in prop::collection::vec((0_usize..7, 1_usize..40), 1..14),
        rooms in 0_u32..4
    ) {
        let ctx = context_with_zone("z", rooms);
        for (idx, count) in loads {
            let category = Category::ALL[idx];
            for _ in 0..count {
                ctx.emit(category, "z", 1.0, payload(category)).expect("emit");
            }
        }
        let before_tick = ctx.get_zone_state("z").expect("zone");
        prop_assert!(before_tick.layer_scores.values().all(|s| (0.0..=100.0).contains(s)));

        ctx.run_tick(&CancelFlag::new());
        let state = ctx.get_zone_state("z").expect("zone");
        prop_assert!((0.0..=100.0).contains(&state.composite_score));
        prop_assert!(state.layer_scores.values().all(|s| (0.0..=100.0).contains(s)));
        prop_assert_eq!(state.tier, Tier::for_score(state.composite_score));
    }
}
