use std::sync::Arc;
use std::time::Duration;

use contracts::InstabilityConfig;
use kernel_core::CancelFlag;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::EngineApi;

/// Wall-clock periods of the recompute (T1) and maintenance (T2) passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerIntervals {
    pub tick: Duration,
    pub maintenance: Duration,
}

impl SchedulerIntervals {
    pub fn from_config(config: &InstabilityConfig) -> Self {
        Self {
            tick: Duration::from_secs(config.tick_interval_secs.max(1)),
            maintenance: Duration::from_secs(config.baseline_interval_secs.max(1)),
        }
    }
}

#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: Arc<CancelFlag>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Requests cancellation, lets the zone in progress finish and waits for
    /// the driver task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.request();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(err) = self.task.await {
            error!(error = %err, "scheduler task ended abnormally");
        }
    }
}

/// Spawns the scheduler loop. Ticks and maintenance run on the blocking pool
/// so a long tick never stalls request handling.
pub fn spawn_scheduler(api: Arc<EngineApi>, intervals: SchedulerIntervals) -> SchedulerHandle {
    let cancel = Arc::new(CancelFlag::new());
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(run_loop(api, intervals, cancel.clone(), stop_rx));
    SchedulerHandle {
        cancel,
        stop: Some(stop_tx),
        task,
    }
}

async fn run_loop(
    api: Arc<EngineApi>,
    intervals: SchedulerIntervals,
    cancel: Arc<CancelFlag>,
    mut stop: oneshot::Receiver<()>,
) {
    let start = tokio::time::Instant::now();
    let mut tick = tokio::time::interval_at(start + intervals.tick, intervals.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut maintenance =
        tokio::time::interval_at(start + intervals.maintenance, intervals.maintenance);
    maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        tick_ms = intervals.tick.as_millis() as u64,
        maintenance_ms = intervals.maintenance.as_millis() as u64,
        "scheduler started"
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = tick.tick() => {
                let api = api.clone();
                let tick_cancel = cancel.clone();
                match tokio::task::spawn_blocking(move || api.run_tick(&tick_cancel)).await {
                    Ok(report) => debug!(%report, "scheduled tick complete"),
                    Err(err) => error!(error = %err, "tick task failed"),
                }
                if cancel.is_requested() {
                    break;
                }
            }
            _ = maintenance.tick() => {
                let api = api.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || api.run_baseline_maintenance()).await {
                    error!(error = %err, "maintenance task failed");
                }
            }
        }
    }

    info!(tick = api.context().current_tick(), "scheduler stopped");
}
