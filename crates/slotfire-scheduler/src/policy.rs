use std::time::Duration;

use slotfire_core::config::{BackoffMode, SchedulerConfig};

/// Timing knobs for a dispatcher run.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Delay before the second attempt.
    pub retry_delay: Duration,
    pub backoff: BackoffMode,
    /// Cap for exponential back-off.
    pub max_retry_delay: Duration,
    /// Upper bound on one executor call.
    pub attempt_timeout: Duration,
    /// Tries for a status write before a claim is handed back to the engine
    /// or a stuck outcome write is logged at ERROR.
    pub persistence_retries: u32,
    pub persistence_backoff: Duration,
    /// Cap for the doubling status-write back-off.
    pub max_persistence_backoff: Duration,
    /// Upper bound on one notifier call.
    pub notify_timeout: Duration,
    pub notify_on_start: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for DispatchPolicy {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            backoff: cfg.backoff,
            max_retry_delay: Duration::from_secs(cfg.max_retry_delay_secs),
            attempt_timeout: Duration::from_secs(cfg.attempt_timeout_secs),
            persistence_retries: cfg.persistence_retries.max(1),
            persistence_backoff: Duration::from_millis(cfg.persistence_backoff_ms),
            max_persistence_backoff: Duration::from_millis(cfg.max_persistence_backoff_ms),
            notify_timeout: Duration::from_secs(30),
            notify_on_start: cfg.notify_on_start,
        }
    }
}

impl DispatchPolicy {
    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffMode::Fixed => self.retry_delay,
            BackoffMode::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.retry_delay
                    .saturating_mul(factor)
                    .min(self.max_retry_delay)
            }
        }
    }

    /// Back-off before retry number `retry` (1-based) of a status write.
    pub fn persistence_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.persistence_backoff
            .saturating_mul(factor)
            .min(self.max_persistence_backoff)
    }

    /// Wait before re-firing a job whose claim could not be written.
    pub fn redispatch_delay(&self) -> Duration {
        self.persistence_delay(self.persistence_retries.saturating_add(1))
    }
}
