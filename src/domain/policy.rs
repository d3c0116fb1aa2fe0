use std::time::Duration;

use super::DomainError;

/// Floor on polling cadence; nothing may poll faster than this.
pub const MIN_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalPolicy {
    pub min_secs: u64,
    pub default_secs: u64,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            min_secs: MIN_INTERVAL_SECS,
            default_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

impl IntervalPolicy {
    pub fn validate(&self, secs: u64) -> Result<Duration, DomainError> {
        let min = self.min_secs.max(MIN_INTERVAL_SECS);
        if secs < min {
            return Err(DomainError::IntervalTooShort { got: secs, min });
        }
        Ok(Duration::from_secs(secs))
    }
}

/// What to do when a check loop panics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed per activation before the loop is given up.
    pub max_restarts: u32,
    pub delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_interval_cannot_be_configured_below_floor() {
        let policy = IntervalPolicy {
            min_secs: 1,
            default_secs: 60,
        };
        assert_eq!(
            policy.validate(5),
            Err(DomainError::IntervalTooShort { got: 5, min: 10 })
        );
        assert_eq!(policy.validate(10), Ok(Duration::from_secs(10)));
    }
}
