//! Startup configuration. Immutable for the lifetime of a process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Category, CategoryScores, SignalPayload};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("category weights must be non-negative, {0} is {1}")]
    NegativeWeight(Category, f64),
    #[error("weight for {0} is missing")]
    MissingWeight(Category),
    #[error("category weights must sum to 1.0, got {0}")]
    WeightSum(f64),
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
    #[error("anomaly thresholds must be strictly increasing: {0} < {1} < {2}")]
    AnomalyOrder(f64, f64, f64),
    #[error("convergence breakpoints must be strictly increasing")]
    BreakpointOrder,
    #[error("convergence multipliers must start at 1.0 and never decrease")]
    MultiplierOrder,
    #[error("route {key} is declared for {declared} but its key names another category")]
    RouteCategory { key: String, declared: Category },
    #[error("route {0} has a negative or non-finite weight")]
    RouteWeight(String),
    #[error("signal type {0} has no route")]
    MissingRoute(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CategoryWeights {
    pub security: f64,
    pub infrastructure: f64,
    pub faction: f64,
    pub environment: f64,
    pub economy: f64,
    pub population: f64,
    pub cyber: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            security: 0.20,
            infrastructure: 0.15,
            faction: 0.15,
            environment: 0.10,
            economy: 0.15,
            population: 0.10,
            cyber: 0.15,
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Security => self.security,
            Category::Infrastructure => self.infrastructure,
            Category::Faction => self.faction,
            Category::Environment => self.environment,
            Category::Economy => self.economy,
            Category::Population => self.population,
            Category::Cyber => self.cyber,
        }
    }

    pub fn as_scores(&self) -> CategoryScores {
        let mut scores = CategoryScores::default();
        for category in Category::ALL {
            scores.set(category, self.get(category));
        }
        scores
    }

    /// Builds a weight set from a complete per-category map.
    pub fn from_map(map: &BTreeMap<Category, f64>) -> Result<Self, ConfigError> {
        let lookup = |category: Category| {
            map.get(&category)
                .copied()
                .ok_or(ConfigError::MissingWeight(category))
        };
        let weights = Self {
            security: lookup(Category::Security)?,
            infrastructure: lookup(Category::Infrastructure)?,
            faction: lookup(Category::Faction)?,
            environment: lookup(Category::Environment)?,
            economy: lookup(Category::Economy)?,
            population: lookup(Category::Population)?,
            cyber: lookup(Category::Cyber)?,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for category in Category::ALL {
            let weight = self.get(category);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::NegativeWeight(category, weight));
            }
        }
        let sum: f64 = Category::ALL.into_iter().map(|c| self.get(c)).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AnomalyThresholds {
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            elevated: 1.5,
            high: 2.0,
            critical: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceConfig {
    /// Same-tick z-score at or above which a category counts as elevated.
    pub z_threshold: f64,
    /// Elevated-category counts at which levels 1, 2 and 3 begin.
    pub level_breakpoints: [usize; 3],
    /// Multiplier per level 0..=3.
    pub multipliers: [f64; 4],
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            z_threshold: 1.5,
            level_breakpoints: [3, 4, 5],
            multipliers: [1.0, 1.15, 1.3, 1.5],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalRoute {
    pub category: Category,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstabilityConfig {
    pub schema_version: String,
    #[serde(default)]
    pub weights: CategoryWeights,
    pub tick_interval_secs: u64,
    pub baseline_interval_secs: u64,
    pub horizon_secs: u64,
    pub window_capacity: usize,
    pub points_per_severity: f64,
    pub max_nudge: f64,
    #[serde(default)]
    pub anomaly: AnomalyThresholds,
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    pub trend_epsilon: f64,
    pub finding_ttl_secs: u64,
    pub baseline_stale_secs: u64,
    #[serde(default = "default_routing")]
    pub routing: BTreeMap<String, SignalRoute>,
}

impl Default for InstabilityConfig {
    fn default() -> Self {
        Self {
            schema_version: crate::SCHEMA_VERSION_V1.to_string(),
            weights: CategoryWeights::default(),
            tick_interval_secs: 60,
            baseline_interval_secs: 3_600,
            horizon_secs: 6 * 3_600,
            window_capacity: 512,
            points_per_severity: 20.0,
            max_nudge: 10.0,
            anomaly: AnomalyThresholds::default(),
            convergence: ConvergenceConfig::default(),
            trend_epsilon: 0.5,
            finding_ttl_secs: 6 * 3_600,
            baseline_stale_secs: 7 * 24 * 3_600,
            routing: default_routing(),
        }
    }
}

/// Route weights for the typed signal kinds; kinds not listed weigh 1.0.
pub fn default_routing() -> BTreeMap<String, SignalRoute> {
    let heavier = [
        ("security.combat", 1.5),
        ("security.breach", 1.25),
        ("infrastructure.structural_damage", 1.25),
        ("faction.recruitment", 0.5),
        ("population.death", 2.0),
        ("population.riot", 1.5),
        ("population.migration", 0.75),
        ("cyber.surveillance", 0.5),
    ];
    SignalPayload::all_signal_types()
        .into_iter()
        .map(|(category, key)| {
            let weight = heavier
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, weight)| *weight)
                .unwrap_or(1.0);
            (key, SignalRoute { category, weight })
        })
        .collect()
}

impl InstabilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        for (value, label) in [
            (self.tick_interval_secs, "tick_interval_secs"),
            (self.baseline_interval_secs, "baseline_interval_secs"),
            (self.horizon_secs, "horizon_secs"),
            (self.finding_ttl_secs, "finding_ttl_secs"),
            (self.baseline_stale_secs, "baseline_stale_secs"),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositive(label));
            }
        }
        if self.window_capacity == 0 {
            return Err(ConfigError::NonPositive("window_capacity"));
        }
        if !(self.points_per_severity > 0.0) {
            return Err(ConfigError::NonPositive("points_per_severity"));
        }
        if !(self.max_nudge >= 0.0) {
            return Err(ConfigError::NonPositive("max_nudge"));
        }
        if !(self.trend_epsilon > 0.0) {
            return Err(ConfigError::NonPositive("trend_epsilon"));
        }

        let a = &self.anomaly;
        if !(0.0 < a.elevated && a.elevated < a.high && a.high < a.critical) {
            return Err(ConfigError::AnomalyOrder(a.elevated, a.high, a.critical));
        }

        let c = &self.convergence;
        if !(c.z_threshold > 0.0) {
            return Err(ConfigError::NonPositive("convergence.z_threshold"));
        }
        let [b1, b2, b3] = c.level_breakpoints;
        if !(0 < b1 && b1 < b2 && b2 < b3) {
            return Err(ConfigError::BreakpointOrder);
        }
        if c.multipliers[0] != 1.0 || c.multipliers.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ConfigError::MultiplierOrder);
        }

        for (key, route) in &self.routing {
            let prefix = key.split('.').next().unwrap_or_default();
            if prefix != route.category.as_str() {
                return Err(ConfigError::RouteCategory {
                    key: key.clone(),
                    declared: route.category,
                });
            }
            if !route.weight.is_finite() || route.weight < 0.0 {
                return Err(ConfigError::RouteWeight(key.clone()));
            }
        }
        for (_, key) in SignalPayload::all_signal_types() {
            if !self.routing.contains_key(&key) {
                return Err(ConfigError::MissingRoute(key));
            }
        }

        Ok(())
    }

    pub fn route(&self, signal_type: &str) -> Option<&SignalRoute> {
        self.routing.get(signal_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = InstabilityConfig::default();
        config.validate().expect("defaults validate");
        let sum: f64 = Category::ALL
            .into_iter()
            .map(|c| config.weights.get(c))
            .sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let mut config = InstabilityConfig::default();
        config.weights.cyber = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::WeightSum(_))));
    }

    #[test]
    fn rejects_unordered_anomaly_thresholds() {
        let mut config = InstabilityConfig::default();
        config.anomaly.high = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AnomalyOrder(..))
        ));
    }

    #[test]
    fn rejects_route_with_foreign_prefix() {
        let mut config = InstabilityConfig::default();
        config.routing.insert(
            "security.combat".to_string(),
            SignalRoute {
                category: Category::Cyber,
                weight: 1.0,
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RouteCategory { .. })
        ));
    }

    #[test]
    fn rejects_missing_route() {
        let mut config = InstabilityConfig::default();
        config.routing.remove("cyber.intrusion");
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingRoute("cyber.intrusion".to_string()))
        );
    }

    #[test]
    fn config_round_trips_through_json_with_defaults() {
        let raw = r#"{
            "schema_version": "1.0",
            "tick_interval_secs": 30,
            "baseline_interval_secs": 600,
            "horizon_secs": 3600,
            "window_capacity": 64,
            "points_per_severity": 10.0,
            "max_nudge": 5.0,
            "trend_epsilon": 0.25,
            "finding_ttl_secs": 1800,
            "baseline_stale_secs": 86400
        }"#;
        let config: InstabilityConfig = serde_json::from_str(raw).expect("parse config");
        config.validate().expect("valid");
        assert_eq!(config.weights, CategoryWeights::default());
        assert_eq!(config.routing, default_routing());
    }

    #[test]
    fn weight_map_requires_every_category() {
        let mut map = CategoryWeights::default().as_scores().to_map();
        map.remove(&Category::Cyber);
        assert_eq!(
            CategoryWeights::from_map(&map),
            Err(ConfigError::MissingWeight(Category::Cyber))
        );
    }
}
