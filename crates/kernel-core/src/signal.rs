//! Signal routing from the ingestion boundary to the layer accumulators.

use std::collections::BTreeMap;

use contracts::{Category, InstabilityConfig, PayloadError, SignalPayload, SignalRoute};

use crate::error::EmitError;
use crate::layer::{Contribution, LayerAccumulator, WindowSnapshot};

/// An immutable typed event. Consumed by one accumulator and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub category: Category,
    pub zone_id: String,
    pub severity: f64,
    pub timestamp: u64,
    pub payload: SignalPayload,
}

impl Signal {
    pub fn new(
        category: Category,
        zone_id: impl Into<String>,
        severity: f64,
        timestamp: u64,
        payload: SignalPayload,
    ) -> Self {
        Self {
            category,
            zone_id: zone_id.into(),
            severity,
            timestamp,
            payload,
        }
    }
}

/// Checks severity range and payload structure. Zone membership is checked by
/// the caller, which owns the registry.
pub fn validate_signal(signal: &Signal) -> Result<(), EmitError> {
    if !(0.0..=1.0).contains(&signal.severity) {
        return Err(EmitError::InvalidSeverity(signal.severity));
    }
    signal.payload.validate(signal.category)?;
    Ok(())
}

#[derive(Debug)]
pub struct SignalBus {
    layers: [LayerAccumulator; 7],
    routing: BTreeMap<String, SignalRoute>,
}

impl SignalBus {
    pub fn new(config: &InstabilityConfig) -> Self {
        let layers = Category::ALL.map(|category| {
            LayerAccumulator::new(
                category,
                config.horizon_secs,
                config.window_capacity,
                config.points_per_severity,
            )
        });
        Self {
            layers,
            routing: config.routing.clone(),
        }
    }

    pub fn accumulator(&self, category: Category) -> &LayerAccumulator {
        &self.layers[category.index()]
    }

    pub fn ensure_zone(&self, zone_id: &str) {
        for layer in &self.layers {
            layer.ensure_zone(zone_id);
        }
    }

    /// Resolves the signal's route and converts it into a weighted contribution.
    pub fn route(&self, signal: &Signal) -> Result<Contribution, EmitError> {
        let signal_type = signal.payload.signal_type();
        let route = self
            .routing
            .get(&signal_type)
            .filter(|route| route.category == signal.category)
            .ok_or(PayloadError::Unrouted(signal_type))?;
        Ok(Contribution::from_weighted(
            signal.timestamp,
            signal.severity,
            route.weight,
        ))
    }

    /// Score points a routed contribution is worth in a zone of `room_count` rooms.
    pub fn points_for(&self, category: Category, contribution: &Contribution, room_count: u32) -> f64 {
        self.accumulator(category).points_for(contribution, room_count)
    }

    /// Appends an already routed contribution to the signal's window.
    pub fn append(&self, signal: &Signal, contribution: Contribution) -> Result<(), EmitError> {
        if !self.accumulator(signal.category).append(&signal.zone_id, contribution) {
            return Err(EmitError::UnknownZone(signal.zone_id.clone()));
        }
        Ok(())
    }

    /// Routes and appends in one step. Returns the score points the
    /// contribution is worth in a zone of `room_count` rooms.
    pub fn deliver(&self, signal: &Signal, room_count: u32) -> Result<f64, EmitError> {
        let contribution = self.route(signal)?;
        self.append(signal, contribution)?;
        Ok(self.points_for(signal.category, &contribution, room_count))
    }

    /// Decay phase for one zone: every category window, in canonical order.
    pub fn decay_zone(&self, zone_id: &str, now: u64) -> [WindowSnapshot; 7] {
        Category::ALL.map(|category| self.accumulator(category).decay(zone_id, now))
    }

    pub fn restore_observations(&self, zone_id: &str, snapshots: &[WindowSnapshot; 7]) {
        for category in Category::ALL {
            self.accumulator(category)
                .restore_observations(zone_id, snapshots[category.index()].observations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CyberKind, SecurityKind};

    fn combat(zone: &str, severity: f64, timestamp: u64) -> Signal {
        Signal::new(
            Category::Security,
            zone,
            severity,
            timestamp,
            SignalPayload::Security {
                kind: SecurityKind::Combat,
                actors: 2,
            },
        )
    }

    #[test]
    fn routes_signal_to_its_category_window() {
        let bus = SignalBus::new(&InstabilityConfig::default());
        bus.ensure_zone("sector_7");
        let points = bus.deliver(&combat("sector_7", 0.5, 10), 1).expect("delivered");

        // 0.5 severity * 1.5 combat weight * 20 points per severity.
        assert!((points - 15.0).abs() < 1e-9);
        assert_eq!(bus.accumulator(Category::Security).window_len("sector_7"), 1);
        assert_eq!(bus.accumulator(Category::Cyber).window_len("sector_7"), 0);
    }

    #[test]
    fn unrouted_signal_type_is_rejected() {
        let mut config = InstabilityConfig::default();
        config.routing.remove("security.combat");
        let bus = SignalBus::new(&config);
        bus.ensure_zone("z");
        let err = bus.deliver(&combat("z", 0.5, 1), 1).expect_err("no route");
        assert!(matches!(err, EmitError::InvalidPayload(PayloadError::Unrouted(_))));
    }

    #[test]
    fn validate_signal_checks_severity_and_payload() {
        assert!(matches!(
            validate_signal(&combat("z", 1.01, 0)),
            Err(EmitError::InvalidSeverity(_))
        ));
        assert!(matches!(
            validate_signal(&combat("z", f64::NAN, 0)),
            Err(EmitError::InvalidSeverity(_))
        ));

        let mismatched = Signal::new(
            Category::Security,
            "z",
            0.3,
            0,
            SignalPayload::Cyber {
                kind: CyberKind::Intrusion,
                node: None,
            },
        );
        assert!(matches!(
            validate_signal(&mismatched),
            Err(EmitError::InvalidPayload(_))
        ));
        assert!(validate_signal(&combat("z", 0.0, 0)).is_ok());
        assert!(validate_signal(&combat("z", 1.0, 0)).is_ok());
    }
}
