//! # Jitter sampling for restart delays.
//!
//! Adds randomness on top of a backoff delay so that services which crashed together do
//! not restart in lockstep. The policy decides the *bound*; this module only samples.

use rand::Rng;
use std::time::Duration;

/// Samples a uniformly distributed duration in `[0, upper]` with millisecond granularity.
///
/// Returns [`Duration::ZERO`] for bounds below one millisecond.
pub(crate) fn uniform_up_to(upper: Duration) -> Duration {
    let ms = upper.as_millis().min(u64::MAX as u128) as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(0..=ms))
}
