//! Handler timeout derivation.

use crate::SchedulerError;
use std::time::Duration;

/// Turns a task's token budget into a wall-clock allowance:
/// `max(floor, token_budget / tokens_per_second)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    pub floor: Duration,
    pub tokens_per_second: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(30),
            tokens_per_second: 100.0,
        }
    }
}

impl TimeoutPolicy {
    pub fn new(floor: Duration, tokens_per_second: f64) -> Result<Self, SchedulerError> {
        let policy = Self {
            floor,
            tokens_per_second,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_config(config: &warden_config::SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::new(
            Duration::from_secs(config.timeout_floor_secs),
            config.timeout_tokens_per_second,
        )
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(self.tokens_per_second > 0.0) || !self.tokens_per_second.is_finite() {
            return Err(SchedulerError::Configuration(format!(
                "tokens_per_second must be > 0, got {}",
                self.tokens_per_second
            )));
        }
        Ok(())
    }

    pub fn timeout_for(&self, token_budget: u32) -> Duration {
        let secs = f64::from(token_budget) / self.tokens_per_second;
        Duration::try_from_secs_f64(secs).map_or(self.floor, |d| d.max(self.floor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_applies_to_small_budgets() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.timeout_for(50), Duration::from_secs(30));
        assert_eq!(policy.timeout_for(3_000), Duration::from_secs(30));
    }

    #[test]
    fn large_budgets_scale_linearly() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.timeout_for(5_000), Duration::from_secs(50));
        assert_eq!(policy.timeout_for(20_000), Duration::from_secs(200));
    }

    #[test]
    fn recalibrated_rate() {
        let policy = TimeoutPolicy::new(Duration::from_secs(5), 10.0).unwrap();
        assert_eq!(policy.timeout_for(20), Duration::from_secs(5));
        assert_eq!(policy.timeout_for(600), Duration::from_secs(60));
    }

    #[test]
    fn non_positive_rate_rejected() {
        assert!(TimeoutPolicy::new(Duration::from_secs(30), 0.0).is_err());
        assert!(TimeoutPolicy::new(Duration::from_secs(30), f64::NAN).is_err());
    }
}
