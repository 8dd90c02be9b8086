//! Exponential backoff with full jitter.

use rand::Rng;
use std::time::Duration;

/// Upper bound of the delay that follows failed attempt `attempt` (1-based).
///
/// `min(max, base × multiplier^(attempt-1))`, saturating instead of overflowing.
pub fn backoff_bound(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let factor = multiplier.max(1.0).powi(exponent);
    let bound_secs = base.as_secs_f64() * factor;

    if !bound_secs.is_finite() || bound_secs >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(bound_secs)
    }
}

/// Sample a delay uniformly from `[0, bound]`.
pub fn full_jitter<R: Rng + ?Sized>(bound: Duration, rng: &mut R) -> Duration {
    if bound.is_zero() {
        return bound;
    }
    let fraction: f64 = rng.gen_range(0.0..=1.0);
    bound.mul_f64(fraction).min(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(800);

    #[test]
    fn test_bound_sequence_is_capped() {
        let bounds: Vec<u128> = (1..=6)
            .map(|attempt| backoff_bound(attempt, BASE, 2.0, MAX).as_millis())
            .collect();
        assert_eq!(bounds, vec![100, 200, 400, 800, 800, 800]);
    }

    #[test]
    fn test_bound_saturates_for_huge_attempts() {
        assert_eq!(backoff_bound(u32::MAX, BASE, 2.0, MAX), MAX);
        assert_eq!(backoff_bound(0, BASE, 2.0, MAX), Duration::ZERO);
    }

    #[test]
    fn test_multiplier_one_is_constant() {
        for attempt in 1..5 {
            assert_eq!(backoff_bound(attempt, BASE, 1.0, MAX), BASE);
        }
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=8 {
            let bound = backoff_bound(attempt, BASE, 2.0, MAX);
            for _ in 0..200 {
                let delay = full_jitter(bound, &mut rng);
                assert!(delay <= bound, "{delay:?} exceeds {bound:?}");
            }
        }
    }

    #[test]
    fn test_jitter_spreads_delays() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<_> = (0..100).map(|_| full_jitter(MAX, &mut rng)).collect();
        let below_half = samples.iter().filter(|d| **d < MAX / 2).count();
        assert!(below_half > 10 && below_half < 90);
    }
}
