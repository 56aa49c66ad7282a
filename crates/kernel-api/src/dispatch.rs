use kernel_core::{Dispatcher, TickEvent};
use tokio::sync::broadcast;

/// Fans tick events out to any number of subscribers. Sending never waits:
/// with no subscriber the event is dropped, and a lagging subscriber skips
/// ahead on its next receive.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<TickEvent>,
}

impl BroadcastDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickEvent> {
        self.sender.subscribe()
    }
}

impl Dispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: TickEvent) {
        let _ = self.sender.send(event);
    }
}
