//! Exponential backoff with jitter

use std::time::Duration;

use crate::clock::jittered;

/// Unjittered delay before retry number `attempt` (starting at 1)
///
/// `min(base * 2^(attempt - 1), max)`
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}

/// [`backoff_delay`] perturbed by `±jitter_ratio`
#[must_use]
pub fn exponential_backoff(
    attempt: u32,
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
) -> Duration {
    let delay = jittered(backoff_delay(attempt, base, max), jitter_ratio);
    tracing::debug!(
        attempt,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "calculated backoff delay"
    );
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(60);

    #[test]
    fn doubles_per_attempt() {
        assert_eq!(backoff_delay(1, BASE, MAX), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, BASE, MAX), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, BASE, MAX), Duration::from_secs(8));
    }

    #[test]
    fn clamps_at_max() {
        // 64s clamped
        assert_eq!(backoff_delay(7, BASE, MAX), MAX);
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn attempt_zero_treated_as_first() {
        assert_eq!(backoff_delay(0, BASE, MAX), BASE);
    }

    #[test]
    fn jittered_delay_within_quarter() {
        for attempt in 1..=8 {
            let plain = backoff_delay(attempt, BASE, MAX);
            let d = exponential_backoff(attempt, BASE, MAX, 0.25);
            assert!(d >= plain.mul_f64(0.75), "attempt {attempt}: {d:?} below 75%");
            assert!(d <= plain.mul_f64(1.25), "attempt {attempt}: {d:?} above 125%");
        }
    }
}
