//! Exponential poll backoff
//!
//! Both wait loops (worker waiting for the envelope, controller waiting for
//! quorum) pace their filesystem polls the same way: start at the configured
//! check interval and grow multiplicatively up to a cap, so polling load
//! drops as a wait lengthens without ever falling below the cap's cadence.

use std::time::Duration;

use crate::config::CoordinationConfig;

/// Poll pacing state for one wait loop
#[derive(Debug)]
pub struct Backoff {
    interval: Duration,
    factor: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            interval: initial,
            factor,
            max,
        }
    }

    /// Build a backoff from the configured knobs
    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::new(config.check_interval, config.backoff_factor, config.max_interval)
    }

    /// The interval the next wait will sleep
    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    /// Sleep the current interval, then grow it for the next poll
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.interval).await;
        self.interval = self.interval.mul_f64(self.factor).min(self.max);
    }
}
