/// Capped exponential backoff for host contention.
///
/// | Attempt | Delay (defaults) |
/// |---------|------------------|
/// | 0       | 100ms            |
/// | 1       | 200ms            |
/// | 2       | 400ms            |
/// | 3       | 800ms            |
/// | 4       | 1600ms           |
///
/// After the last attempt the retry is abandoned and a warning logged.
use crate::settings::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_ms: u32,
    pub max_ms: u32,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> RetryPolicy {
        RetryPolicy {
            base_ms: config.retry_base_ms,
            max_ms: config.retry_max_ms,
            max_attempts: config.retry_max_attempts,
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` once the
    /// attempt ceiling is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<u32> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let policy = RetryPolicy {
            base_ms: 100,
            max_ms: 500,
            max_attempts: 5,
        };

        let delays: Vec<Option<u32>> = (0..6).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![Some(100), Some(200), Some(400), Some(500), Some(500), None]
        );
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy {
            base_ms: 100,
            max_ms: 2_000,
            max_attempts: u32::MAX,
        };
        assert_eq!(policy.delay_for(40), Some(2_000));
    }

    #[test]
    fn test_default_matches_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Some(100));
        assert_eq!(policy.delay_for(5), None);
    }
}
