//! Scheduler - drives pollers on a trigger
//!
//! `TokioScheduler` runs each task on its own spawned loop, selecting
//! between the trigger sleep and a cooperative stop signal. Cancelling with
//! `may_interrupt` additionally aborts the loop, interrupting an in-flight
//! run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// When and how often a scheduled task fires.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub initial_delay: Duration,
    pub period: Duration,
    /// Fixed-rate fires on a steady cadence; fixed-delay (the default)
    /// waits out the period after each completed run.
    pub fixed_rate: bool,
}

impl Trigger {
    pub fn every(period: Duration) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            period,
            fixed_rate: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn at_fixed_rate(mut self) -> Self {
        self.fixed_rate = true;
        self
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::every(Duration::from_secs(1))
    }
}

/// A unit of work the scheduler invokes on each trigger firing.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(self: Arc<Self>);
}

/// External scheduling collaborator.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Arc<dyn ScheduledTask>, trigger: Trigger) -> ScheduleHandle;
}

/// Handle to a scheduled task registration.
pub struct ScheduleHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Request the schedule to stop. With `may_interrupt` the task loop is
    /// aborted as well, interrupting a run in progress; otherwise the
    /// current run finishes and no further runs fire.
    pub fn cancel(&self, may_interrupt: bool) {
        let _ = self.stop_tx.send(true);
        if may_interrupt {
            self.join.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Scheduler backed by spawned tokio tasks.
#[derive(Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Arc<dyn ScheduledTask>, trigger: Trigger) -> ScheduleHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_schedule(task, trigger, stop_rx));
        ScheduleHandle { stop_tx, join }
    }
}

async fn run_schedule(
    task: Arc<dyn ScheduledTask>,
    trigger: Trigger,
    mut stop_rx: watch::Receiver<bool>,
) {
    if !trigger.initial_delay.is_zero() {
        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = tokio::time::sleep(trigger.initial_delay) => {}
        }
    }
    if trigger.fixed_rate {
        let mut ticker = tokio::time::interval(trigger.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => task.clone().run().await,
            }
        }
    } else {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            task.clone().run().await;
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(trigger.period) => {}
            }
        }
    }
    debug!("schedule loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledTask for Counting {
        async fn run(self: Arc<Self>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn task_fires_until_cancelled() {
        let task = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let scheduler = TokioScheduler::new();
        let handle = scheduler.schedule(task.clone(), Trigger::every(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.cancel(false);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_cancel = task.runs.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn initial_delay_defers_first_run() {
        let task = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let scheduler = TokioScheduler::new();
        let handle = scheduler.schedule(
            task.clone(),
            Trigger::every(Duration::from_millis(10)).with_initial_delay(Duration::from_millis(80)),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
        handle.cancel(true);
    }
}
