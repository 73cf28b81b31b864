//! Periodic re-sync while the live channel is down.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::task::ScheduledTask;

/// Fires a tick every `interval` while running.
///
/// The first tick comes one full interval after [`start`](Self::start); the
/// poller never fires immediately. What a tick does is up to the owner.
#[derive(Debug)]
pub struct FallbackPoller {
    interval: Duration,
    task: Option<ScheduledTask>,
}

impl FallbackPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Start ticking. No-op when already running.
    pub fn start(&mut self, on_tick: impl Fn() + Send + 'static) {
        if self.task.is_some() {
            return;
        }
        let period = self.interval;
        tracing::debug!(interval = ?period, "fallback polling started");
        self.task = Some(ScheduledTask::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                on_tick();
            }
        }));
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
            tracing::debug!("fallback polling stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut poller = FallbackPoller::new(Duration::from_secs(10));
        poller.start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let mut poller = FallbackPoller::new(Duration::from_secs(10));
        poller.start(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        poller.stop();
        assert!(!poller.is_running());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut poller = FallbackPoller::new(Duration::from_secs(10));
        for _ in 0..2 {
            let counter = count.clone();
            poller.start(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
