use std::time::Duration;

/// Strategy for computing delay between retry attempts.
///
/// Each variant clamps the computed delay so it never exceeds the configured
/// maximum.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Exponential backoff: `base * multiplier^attempt`, optionally with
    /// deterministic jitter.
    Exponential {
        /// Initial delay before the first retry.
        base: Duration,
        /// Upper bound on the computed delay.
        max: Duration,
        /// Factor applied on each successive attempt.
        multiplier: f64,
        /// When `true`, a deterministic jitter factor is applied so that
        /// concurrent callers do not all retry at the same instant.
        jitter: bool,
    },
    /// Constant delay between every retry attempt.
    Constant {
        /// Fixed delay duration.
        delay: Duration,
    },
}

impl RetryStrategy {
    /// Compute the delay duration for the given zero-based `attempt` number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                let base_secs = base.as_secs_f64();
                // `attempt` is a small retry count; wrapping cannot occur.
                #[allow(clippy::cast_possible_wrap)]
                let raw = base_secs * multiplier.powi(attempt as i32);

                let adjusted = if *jitter {
                    // Deterministic jitter: vary by +0% to +40% based on the
                    // attempt number. Spreads retries across a window
                    // without a random number generator.
                    let jitter_factor = 1.0 + 0.1 * f64::from(attempt % 5);
                    raw * jitter_factor
                } else {
                    raw
                };

                let clamped = adjusted.min(max.as_secs_f64());
                Duration::from_secs_f64(clamped)
            }
            Self::Constant { delay } => *delay,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(5),
            max: Duration::from_secs(15 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_no_jitter_basic() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn exponential_clamped_to_max() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: 3.0,
            jitter: false,
        };
        assert_eq!(strategy.delay_for(0), Duration::from_secs(1));
        assert_eq!(strategy.delay_for(1), Duration::from_secs(3));
        assert_eq!(strategy.delay_for(2), Duration::from_secs(5));
        assert_eq!(strategy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn exponential_with_jitter_is_deterministic() {
        let strategy = RetryStrategy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        };
        // attempt 1: 200ms * 1.1 = 220ms
        assert_eq!(strategy.delay_for(1), Duration::from_millis(220));
        // attempt 5 shares attempt 0's jitter factor (5 % 5 == 0).
        assert_eq!(strategy.delay_for(5), Duration::from_millis(3200));
    }

    #[test]
    fn constant_always_same() {
        let strategy = RetryStrategy::Constant {
            delay: Duration::from_millis(250),
        };
        for attempt in 0..10 {
            assert_eq!(strategy.delay_for(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn default_is_exponential_with_jitter() {
        match RetryStrategy::default() {
            RetryStrategy::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                assert_eq!(base, Duration::from_secs(5));
                assert_eq!(max, Duration::from_secs(900));
                assert!((multiplier - 2.0).abs() < f64::EPSILON);
                assert!(jitter);
            }
            RetryStrategy::Constant { .. } => panic!("default should be Exponential"),
        }
    }
}
