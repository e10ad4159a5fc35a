//! Reconnect backoff.
//!
//! The retry delay is a plain producer function of the attempt number so a
//! client can be configured with any policy; the default is exponential
//! backoff with uniform jitter. The jitter source is injectable for
//! deterministic tests.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces the delay before reconnect attempt `n` (1-based).
pub type RetryWaitFn = Box<dyn FnMut(u32) -> Duration + Send>;

/// Base delay of the default policy.
const BASE_DELAY_MS: u64 = 1_000;
/// Jitter added on top of the exponential delay.
const JITTER_MS: std::ops::RangeInclusive<u64> = 300..=3_000;
/// Doubling stops here to keep the delay bounded (and the shift sane).
const MAX_EXPONENT: u32 = 10;

/// The default policy: `1s · 2^(n-1)` plus 300–3000 ms of uniform jitter.
pub fn randomised_exponential_backoff() -> RetryWaitFn {
    backoff_with_rng(StdRng::from_entropy())
}

/// The default policy with a caller-supplied jitter source.
pub fn backoff_with_rng<R>(mut rng: R) -> RetryWaitFn
where
    R: Rng + Send + 'static,
{
    Box::new(move |attempt| {
        let shift = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let base = Duration::from_millis(BASE_DELAY_MS << shift);
        base + Duration::from_millis(rng.gen_range(JITTER_MS))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_the_jittered_envelope() {
        let mut wait = backoff_with_rng(StdRng::seed_from_u64(7));
        for attempt in 1..=6u32 {
            let delay = wait(attempt).as_millis() as u64;
            let base = BASE_DELAY_MS << (attempt - 1);
            assert!(delay >= base + 300, "attempt {attempt}: {delay} too small");
            assert!(delay <= base + 3_000, "attempt {attempt}: {delay} too large");
        }
    }

    #[test]
    fn exponent_is_capped() {
        let mut wait = backoff_with_rng(StdRng::seed_from_u64(7));
        let huge = wait(64).as_millis() as u64;
        assert!(huge <= (BASE_DELAY_MS << MAX_EXPONENT) + 3_000);
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut a = backoff_with_rng(StdRng::seed_from_u64(42));
        let mut b = backoff_with_rng(StdRng::seed_from_u64(42));
        for attempt in 1..=4 {
            assert_eq!(a(attempt), b(attempt));
        }
    }
}
