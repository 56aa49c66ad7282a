use contracts::{Category, ConfigError, PayloadError};

use crate::scheduler::Phase;

/// Synchronous rejection at the ingestion boundary. The signal is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmitError {
    #[error("zone {0} is not registered")]
    UnknownZone(String),
    #[error("severity {0} is outside [0, 1]")]
    InvalidSeverity(f64),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("zone id must be a non-empty identifier without whitespace, got {0:?}")]
    InvalidZoneId(String),
    #[error("weight overrides for zone {zone_id} are invalid: {source}")]
    InvalidWeights {
        zone_id: String,
        #[source]
        source: ConfigError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("zone {0} not found")]
pub struct ZoneNotFound(pub String);

/// Inconsistent per-zone state found while computing a tick. Never leaves the
/// scheduler; the zone keeps its last good state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputationError {
    #[error("baseline for {category} is corrupt: {reason}")]
    CorruptBaseline { category: Category, reason: String },
    #[error("{what} produced a non-finite value")]
    NonFiniteScore { what: String },
    #[error("zone disappeared from the registry mid-tick")]
    ZoneVanished,
}

/// A computation error tagged with the pipeline phase that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{phase:?}: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: ComputationError,
}

impl PhaseError {
    pub fn new(phase: Phase, source: ComputationError) -> Self {
        Self { phase, source }
    }
}
