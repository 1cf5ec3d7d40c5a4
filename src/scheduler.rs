//! 轮询调度器 - 固定间隔触发采集周期
//!
//! A single tokio task owns the collector and a recurring timer. Each tick
//! runs one full cycle before the next tick is awaited, so cycles never
//! overlap. Missed ticks are delayed rather than fired in a burst.

use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::collector::{Collector, PollOutcome};
use crate::source::LogSource;

/// Drives a collector on a fixed cadence.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    interval: Duration,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the poll loop. The first cycle runs immediately.
    ///
    /// Dropping the returned handle stops the loop after the current cycle.
    pub fn start<S>(&self, collector: Collector<S>) -> SchedulerHandle<S>
    where
        S: LogSource + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(collector, self.interval, stop_rx));
        info!(interval_secs = self.interval.as_secs(), "Poll scheduler started");
        SchedulerHandle { stop_tx, task }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle<S: LogSource> {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Collector<S>>,
}

impl<S: LogSource> SchedulerHandle<S> {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop between cycles and hand the collector back.
    pub async fn stop(self) -> Result<Collector<S>, JoinError> {
        // 任务已退出时 send 会失败，直接等待 join 即可
        let _ = self.stop_tx.send(true);
        self.task.await
    }
}

async fn run_loop<S: LogSource>(
    mut collector: Collector<S>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> Collector<S> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if let Err(e) = run_cycle(&mut collector) {
            error!("Error polling logs: {}", e);
        }
    }

    let stats = collector.stats();
    info!(
        cycles = stats.cycles,
        failed = stats.failed_cycles,
        events = stats.events_emitted,
        "Poll scheduler stopped"
    );
    collector
}

/// `log show` blocks; on a multi-thread runtime hand the worker over first.
fn run_cycle<S: LogSource>(collector: &mut Collector<S>) -> crate::error::Result<PollOutcome> {
    if Handle::current().runtime_flavor() == RuntimeFlavor::MultiThread {
        tokio::task::block_in_place(|| collector.poll_once())
    } else {
        collector.poll_once()
    }
}
