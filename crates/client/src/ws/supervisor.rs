//! Reconnection supervision for a conversation's channel.

use std::time::Duration;

use super::connection::ReconnectConfig;
use crate::task::ScheduledTask;

/// What to do after the channel closed unexpectedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Reconnect after `delay`; this will be attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The attempt cap is reached.
    GiveUp { attempts: u32 },
}

/// Tracks reconnect attempts and owns the pending reconnect timer.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    config: ReconnectConfig,
    attempts: u32,
    exhausted: bool,
    pending: Option<ScheduledTask>,
}

impl ReconnectSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            exhausted: false,
            pending: None,
        }
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// The channel opened: the attempt counter starts over.
    pub fn on_open(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
        self.pending = None;
    }

    /// The channel closed without being asked to.
    pub fn on_unexpected_close(&mut self) -> CloseDecision {
        if self.attempts >= self.config.max_attempts {
            self.exhausted = true;
            return CloseDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        CloseDecision::Retry {
            attempt: self.attempts,
            delay: self.config.delay_for_attempt(self.attempts),
        }
    }

    /// Arm the reconnect timer, replacing any earlier one.
    pub fn schedule(&mut self, delay: Duration, fire: impl FnOnce() + Send + 'static) {
        self.pending = Some(ScheduledTask::after(delay, fire));
    }

    /// The reconnect timer fired and its attempt is underway.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    /// Cancel any pending reconnect.
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_max_attempts() {
        let mut supervisor = ReconnectSupervisor::new(ReconnectConfig::default());
        let decisions: Vec<_> = (0..6).map(|_| supervisor.on_unexpected_close()).collect();

        for (i, decision) in decisions.iter().take(5).enumerate() {
            let attempt = i as u32 + 1;
            assert_eq!(
                *decision,
                CloseDecision::Retry {
                    attempt,
                    delay: Duration::from_secs(u64::from(attempt)),
                }
            );
        }
        assert_eq!(decisions[5], CloseDecision::GiveUp { attempts: 5 });
        assert!(supervisor.is_exhausted());
    }

    #[test]
    fn successful_open_resets_counter() {
        let mut supervisor = ReconnectSupervisor::new(ReconnectConfig::default());
        supervisor.on_unexpected_close();
        supervisor.on_unexpected_close();
        assert_eq!(supervisor.attempts(), 2);

        supervisor.on_open();
        assert_eq!(supervisor.attempts(), 0);
        assert_eq!(
            supervisor.on_unexpected_close(),
            CloseDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_pending_reconnect() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let mut supervisor = ReconnectSupervisor::new(ReconnectConfig::default());
        supervisor.schedule(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst));
        assert!(supervisor.has_pending());

        supervisor.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!supervisor.has_pending());
    }
}
