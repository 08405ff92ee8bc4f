// Reconciliation config - timing of confirmation polling and the pending sweep

use crate::reconciliation::ReconciliationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[serde_with::serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Delay between background ticks
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// Upper bound of the random extra delay added to each tick
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_tick_jitter")]
    pub tick_jitter: Duration,
    /// Pending deposits older than this fail as "payment not received"
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout: Duration,
    /// Confirming deposits older than this expire
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout: Duration,
    /// Transactions younger than this are left to their callbacks
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_min_poll_age")]
    pub min_poll_age: Duration,
    /// Confirmations after which a crypto payment counts as settled
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            tick_jitter: default_tick_jitter(),
            pending_timeout: default_pending_timeout(),
            confirmation_timeout: default_confirmation_timeout(),
            min_poll_age: default_min_poll_age(),
            required_confirmations: default_required_confirmations(),
        }
    }
}

impl ReconciliationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_tick_jitter(mut self, jitter: Duration) -> Self {
        self.tick_jitter = jitter;
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_min_poll_age(mut self, age: Duration) -> Self {
        self.min_poll_age = age;
        self
    }

    pub fn with_required_confirmations(mut self, confirmations: u32) -> Self {
        self.required_confirmations = confirmations;
        self
    }

    pub fn validate(&self) -> Result<(), ReconciliationError> {
        if self.tick_interval.is_zero() {
            return Err(ReconciliationError::InvalidConfig(
                "tick_interval must be > 0".to_string(),
            ));
        }
        if self.required_confirmations == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "required_confirmations must be > 0".to_string(),
            ));
        }
        if self.confirmation_timeout <= self.min_poll_age {
            return Err(ReconciliationError::InvalidConfig(
                "confirmation_timeout must exceed min_poll_age".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_tick_jitter() -> Duration {
    Duration::from_secs(5)
}

fn default_pending_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_confirmation_timeout() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_min_poll_age() -> Duration {
    Duration::from_secs(60)
}

fn default_required_confirmations() -> u32 {
    3
}
