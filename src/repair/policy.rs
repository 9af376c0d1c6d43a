use std::time::Duration;

use crate::config::EngineConfig;

/// Attempt and backoff limits for one repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_generation_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            max_generation_retries: cfg.max_generation_retries,
            base: cfg.backoff_base(),
            cap: cfg.backoff_cap(),
        }
    }

    /// Delay after failure number `n` (1-based): `min(base * 2^(n-1), cap)`.
    #[inline]
    #[must_use]
    pub fn backoff(&self, n: u32) -> Duration {
        let exp = n.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let p = RetryPolicy {
            max_attempts: 3,
            max_generation_retries: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_millis(8_000),
        };

        let ms: Vec<u128> = (1..=7).map(|n| p.backoff(n).as_millis()).collect();
        assert_eq!(ms, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(p.backoff(0), Duration::from_millis(500));
        assert_eq!(p.backoff(u32::MAX), Duration::from_millis(8_000));
    }
}
