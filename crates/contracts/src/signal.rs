//! Typed signal metadata: one payload variant per category, each validated before routing.

use serde::{Deserialize, Serialize};

use crate::Category;

macro_rules! signal_kind {
    ($name:ident, $category:expr, { $($variant:ident => $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
            pub const CATEGORY: Category = $category;

            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Routing key, e.g. `security.combat`.
            pub fn signal_type(self) -> String {
                format!("{}.{}", Self::CATEGORY.as_str(), self.as_str())
            }
        }
    };
}

signal_kind!(SecurityKind, Category::Security, {
    Combat => "combat",
    Theft => "theft",
    Assault => "assault",
    Breach => "breach",
});

signal_kind!(InfrastructureKind, Category::Infrastructure, {
    PowerFailure => "power_failure",
    StructuralDamage => "structural_damage",
    TransitDisruption => "transit_disruption",
    UtilityOutage => "utility_outage",
});

signal_kind!(FactionKind, Category::Faction, {
    Skirmish => "skirmish",
    TerritoryClaim => "territory_claim",
    Recruitment => "recruitment",
    Betrayal => "betrayal",
});

signal_kind!(EnvironmentKind, Category::Environment, {
    Hazard => "hazard",
    Storm => "storm",
    Contamination => "contamination",
    Fire => "fire",
});

signal_kind!(EconomyKind, Category::Economy, {
    PriceShock => "price_shock",
    Shortage => "shortage",
    Robbery => "robbery",
    Bankruptcy => "bankruptcy",
});

signal_kind!(PopulationKind, Category::Population, {
    Death => "death",
    Injury => "injury",
    Migration => "migration",
    Riot => "riot",
});

signal_kind!(CyberKind, Category::Cyber, {
    Intrusion => "intrusion",
    NetworkOutage => "network_outage",
    DataTheft => "data_theft",
    Surveillance => "surveillance",
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload category {payload} does not match declared category {declared}")]
    CategoryMismatch {
        declared: Category,
        payload: Category,
    },
    #[error("security signals need at least one actor")]
    NoActors,
    #[error("faction signals need at least one faction id")]
    NoFactions,
    #[error("faction id must not be blank")]
    BlankFactionId,
    #[error("environment intensity {0} is outside [0, 1]")]
    IntensityOutOfRange(f64),
    #[error("economy amount {0} must not be negative")]
    NegativeAmount(i64),
    #[error("population signals need a headcount of at least one")]
    NoHeadcount,
    #[error("cyber node id must not be blank when present")]
    BlankNode,
    #[error("signal type {0} has no route")]
    Unrouted(String),
}

/// Category-keyed signal metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum SignalPayload {
    Security {
        kind: SecurityKind,
        actors: u32,
    },
    Infrastructure {
        kind: InfrastructureKind,
        #[serde(default)]
        rooms_affected: u32,
    },
    Faction {
        kind: FactionKind,
        factions: Vec<String>,
    },
    Environment {
        kind: EnvironmentKind,
        intensity: f64,
    },
    Economy {
        kind: EconomyKind,
        amount: i64,
    },
    Population {
        kind: PopulationKind,
        headcount: u32,
    },
    Cyber {
        kind: CyberKind,
        #[serde(default)]
        node: Option<String>,
    },
}

impl SignalPayload {
    pub fn category(&self) -> Category {
        match self {
            SignalPayload::Security { .. } => Category::Security,
            SignalPayload::Infrastructure { .. } => Category::Infrastructure,
            SignalPayload::Faction { .. } => Category::Faction,
            SignalPayload::Environment { .. } => Category::Environment,
            SignalPayload::Economy { .. } => Category::Economy,
            SignalPayload::Population { .. } => Category::Population,
            SignalPayload::Cyber { .. } => Category::Cyber,
        }
    }

    pub fn signal_type(&self) -> String {
        match self {
            SignalPayload::Security { kind, .. } => kind.signal_type(),
            SignalPayload::Infrastructure { kind, .. } => kind.signal_type(),
            SignalPayload::Faction { kind, .. } => kind.signal_type(),
            SignalPayload::Environment { kind, .. } => kind.signal_type(),
            SignalPayload::Economy { kind, .. } => kind.signal_type(),
            SignalPayload::Population { kind, .. } => kind.signal_type(),
            SignalPayload::Cyber { kind, .. } => kind.signal_type(),
        }
    }

    /// Structural checks independent of routing configuration.
    pub fn validate(&self, declared: Category) -> Result<(), PayloadError> {
        let payload = self.category();
        if payload != declared {
            return Err(PayloadError::CategoryMismatch { declared, payload });
        }

        match self {
            SignalPayload::Security { actors, .. } if *actors == 0 => Err(PayloadError::NoActors),
            SignalPayload::Faction { factions, .. } if factions.is_empty() => {
                Err(PayloadError::NoFactions)
            }
            SignalPayload::Faction { factions, .. }
                if factions.iter().any(|id| id.trim().is_empty()) =>
            {
                Err(PayloadError::BlankFactionId)
            }
            SignalPayload::Environment { intensity, .. }
                if !(0.0..=1.0).contains(intensity) =>
            {
                Err(PayloadError::IntensityOutOfRange(*intensity))
            }
            SignalPayload::Economy { amount, .. } if *amount < 0 => {
                Err(PayloadError::NegativeAmount(*amount))
            }
            SignalPayload::Population { headcount, .. } if *headcount == 0 => {
                Err(PayloadError::NoHeadcount)
            }
            SignalPayload::Cyber {
                node: Some(node), ..
            } if node.trim().is_empty() => Err(PayloadError::BlankNode),
            _ => Ok(()),
        }
    }

    /// Every routing key the typed payloads can produce, grouped by category.
    pub fn all_signal_types() -> Vec<(Category, String)> {
        let mut types = Vec::new();
        types.extend(SecurityKind::ALL.iter().map(|k| (SecurityKind::CATEGORY, k.signal_type())));
        types.extend(
            InfrastructureKind::ALL
                .iter()
                .map(|k| (InfrastructureKind::CATEGORY, k.signal_type())),
        );
        types.extend(FactionKind::ALL.iter().map(|k| (FactionKind::CATEGORY, k.signal_type())));
        types.extend(
            EnvironmentKind::ALL
                .iter()
                .map(|k| (EnvironmentKind::CATEGORY, k.signal_type())),
        );
        types.extend(EconomyKind::ALL.iter().map(|k| (EconomyKind::CATEGORY, k.signal_type())));
        types.extend(
            PopulationKind::ALL
                .iter()
                .map(|k| (PopulationKind::CATEGORY, k.signal_type())),
        );
        types.extend(CyberKind::ALL.iter().map(|k| (CyberKind::CATEGORY, k.signal_type())));
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_category() {
        let raw = r#"{"category":"security","kind":"combat","actors":3}"#;
        let payload: SignalPayload = serde_json::from_str(raw).expect("valid payload");
        assert_eq!(payload.category(), Category::Security);
        assert_eq!(payload.signal_type(), "security.combat");
    }

    #[test]
    fn validate_rejects_mismatched_category() {
        let payload = SignalPayload::Cyber {
            kind: CyberKind::Intrusion,
            node: None,
        };
        let err = payload
            .validate(Category::Economy)
            .expect_err("mismatch should fail");
        assert!(matches!(err, PayloadError::CategoryMismatch { .. }));
    }

    #[test]
    fn validate_checks_variant_structure() {
        let empty_factions = SignalPayload::Faction {
            kind: FactionKind::Skirmish,
            factions: vec![],
        };
        assert_eq!(
            empty_factions.validate(Category::Faction),
            Err(PayloadError::NoFactions)
        );

        let blank_faction = SignalPayload::Faction {
            kind: FactionKind::Betrayal,
            factions: vec!["red_hand".to_string(), " ".to_string()],
        };
        assert_eq!(
            blank_faction.validate(Category::Faction),
            Err(PayloadError::BlankFactionId)
        );

        let hot = SignalPayload::Environment {
            kind: EnvironmentKind::Fire,
            intensity: 1.5,
        };
        assert!(matches!(
            hot.validate(Category::Environment),
            Err(PayloadError::IntensityOutOfRange(_))
        ));

        let fine = SignalPayload::Population {
            kind: PopulationKind::Injury,
            headcount: 2,
        };
        assert!(fine.validate(Category::Population).is_ok());
    }

    #[test]
    fn signal_types_cover_every_category() {
        let types = SignalPayload::all_signal_types();
        for category in Category::ALL {
            assert!(types.iter().any(|(c, _)| *c == category));
        }
        for (category, key) in &types {
            assert!(key.starts_with(category.as_str()));
        }
    }
}
