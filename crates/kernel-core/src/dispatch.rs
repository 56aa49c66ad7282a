//! Fire-and-forget hand-off of tick results to external collaborators.

use contracts::{Finding, Tier};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TickEvent {
    TierChanged {
        zone_id: String,
        tick: u64,
        from: Tier,
        to: Tier,
        composite_score: f64,
    },
    FindingRecorded {
        finding: Finding,
    },
}

/// Receives tick events. Implementations must return without waiting on the
/// consumer; a slow consumer loses events rather than stalling the tick.
pub trait Dispatcher: Send + Sync + std::fmt::Debug {
    fn dispatch(&self, event: TickEvent);
}

#[derive(Debug, Default)]
pub struct NullDispatcher;

impl Dispatcher for NullDispatcher {
    fn dispatch(&self, _event: TickEvent) {}
}

/// Keeps every event in memory. Used by tests and the simulate command.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<TickEvent>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<TickEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<TickEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, event: TickEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_change_serializes_with_type_tag() {
        let event = TickEvent::TierChanged {
            zone_id: "sector_7".to_string(),
            tick: 4,
            from: Tier::Stable,
            to: Tier::Unstable,
            composite_score: 44.5,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "tier_changed");
        assert_eq!(value["to"], "unstable");
        assert_eq!(value["tick"], 4);
    }

    #[test]
    fn recording_dispatcher_drains_on_take() {
        let recorder = RecordingDispatcher::default();
        recorder.dispatch(TickEvent::TierChanged {
            zone_id: "z".to_string(),
            tick: 1,
            from: Tier::Stable,
            to: Tier::Elevated,
            composite_score: 21.0,
        });
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.events().is_empty());
    }
}
