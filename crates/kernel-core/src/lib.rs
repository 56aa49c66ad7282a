//! Zone instability analytics: windowed layer scores, streaming baselines,
//! anomaly and convergence detection, and the tick pipeline that ties them
//! together behind an explicit [`SimulationContext`].

pub mod anomaly;
pub mod clock;
pub mod context;
pub mod convergence;
pub mod dispatch;
pub mod error;
pub mod findings;
pub mod layer;
pub mod scheduler;
pub mod signal;
pub mod zone;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{PersistedState, SimulationContext};
pub use dispatch::{Dispatcher, NullDispatcher, RecordingDispatcher, TickEvent};
pub use error::{ComputationError, EmitError, PhaseError, RegistrationError, ZoneNotFound};
pub use scheduler::{CancelFlag, Phase, ScheduledJob};
pub use signal::Signal;
