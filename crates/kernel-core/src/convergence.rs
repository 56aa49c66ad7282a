//! Multi-category convergence escalation.

use contracts::{Category, ConvergenceConfig, FindingSeverity};

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    pub zone_id: String,
    pub elevated: Vec<Category>,
    pub elevated_category_count: usize,
    pub level: u8,
    pub multiplier: f64,
}

impl ConvergenceState {
    pub fn severity(&self) -> Option<FindingSeverity> {
        match self.level {
            0 => None,
            1 => Some(FindingSeverity::Elevated),
            2 => Some(FindingSeverity::High),
            _ => Some(FindingSeverity::Critical),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self { config }
    }

    /// Step function of the elevated count: 0-2 → 0, 3 → 1, 4 → 2, 5+ → 3
    /// with the default breakpoints.
    pub fn level_for(&self, elevated_count: usize) -> u8 {
        self.config
            .level_breakpoints
            .iter()
            .filter(|breakpoint| elevated_count >= **breakpoint)
            .count() as u8
    }

    pub fn multiplier_for(&self, level: u8) -> f64 {
        let idx = usize::from(level).min(self.config.multipliers.len() - 1);
        self.config.multipliers[idx]
    }

    /// Counts categories whose same-tick z-score reaches the threshold.
    /// Categories without an evaluable z-score never count.
    pub fn detect(&self, zone_id: &str, z_scores: &[(Category, Option<f64>)]) -> ConvergenceState {
        let mut elevated = z_scores
            .iter()
            .filter_map(|(category, z)| match z {
                Some(z) if *z >= self.config.z_threshold => Some(*category),
                _ => None,
            })
            .collect::<Vec<_>>();
        elevated.sort();
        elevated.dedup();

        let level = self.level_for(elevated.len());
        ConvergenceState {
            zone_id: zone_id.to_string(),
            elevated_category_count: elevated.len(),
            elevated,
            level,
            multiplier: self.multiplier_for(level),
        }
    }
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new(ConvergenceConfig::default())
    }
}
