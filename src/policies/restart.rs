//! # Restart policy: backoff and jitter for crashed services.
//!
//! [`RestartPolicy`] is a small stateful calculator owned by exactly one supervisor. Each
//! restart attempt asks it for `backoff() + jitter()`; the `started` acknowledgment of the
//! restarted service calls `reset()`.
//!
//! - [`RestartStrategy::Immediate`] restart without delay.
//! - [`RestartStrategy::FixedBackoff`] always wait `fixed_backoff`.
//! - [`RestartStrategy::ExponentialBackoff`] 1s, 2s, 4s, … capped at `max_backoff` (default).
//! - [`RestartStrategy::LinearBackoff`] 1s, 2s, 3s, … capped at `max_backoff`.
//! - [`RestartStrategy::CustomBackoff`] delegate to a user function of the attempt count.
//!
//! ## Sequences (defaults)
//! ```text
//! Exponential: backoff() → 1, 2, 4, 8, 16, 32, 60, 60, …   jitter() ∈ [0, min(5, current/2)]
//! Linear:      backoff() → 1, 2, 3, …, 59, 60, 60, …        jitter() = 0
//! Fixed:       backoff() → 5, 5, 5, …                       jitter() = 0
//! Immediate:   backoff() → 0, 0, 0, …                       jitter() = 0
//! ```
//!
//! ## Rules
//! - `jitter()` is non-zero only for the exponential strategy.
//! - `jitter()` increments `retry_attempts` for every strategy; a custom function sees a
//!   growing attempt count.
//! - `reset()` only affects the exponential and linear strategies.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use crate::error::{PolicyError, RuntimeError};

use super::jitter::uniform_up_to;

/// Seed value of `current_backoff`.
const SEED_BACKOFF: Duration = Duration::from_secs(1);
/// Linear growth step.
const LINEAR_STEP: Duration = Duration::from_secs(1);

/// User-provided backoff: maps the retry attempt count to a delay in seconds.
#[derive(Clone)]
pub struct CustomBackoff(Arc<dyn Fn(u32) -> f64 + Send + Sync>);

impl CustomBackoff {
    /// Wraps a function of `retry_attempts` returning seconds.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u32) -> f64 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn delay(&self, attempt: u32) -> Result<Duration, PolicyError> {
        let seconds = (self.0)(attempt);
        Duration::try_from_secs_f64(seconds).map_err(|_| PolicyError::InvalidDelay { seconds, attempt })
    }
}

impl fmt::Debug for CustomBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomBackoff(<fn>)")
    }
}

/// How the delay before a restart evolves.
#[derive(Clone, Debug)]
pub enum RestartStrategy {
    /// Restart with no delay.
    Immediate,
    /// Restart after a constant delay.
    FixedBackoff,
    /// Double the delay on each attempt, capped at `max_backoff`.
    ExponentialBackoff,
    /// Grow the delay by one second on each attempt, capped at `max_backoff`.
    LinearBackoff,
    /// Delay computed by a user function of the attempt count.
    CustomBackoff(CustomBackoff),
}

impl RestartStrategy {
    /// Stable name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartStrategy::Immediate => "Immediate",
            RestartStrategy::FixedBackoff => "FixedBackoff",
            RestartStrategy::ExponentialBackoff => "ExponentialBackoff",
            RestartStrategy::LinearBackoff => "LinearBackoff",
            RestartStrategy::CustomBackoff(_) => "CustomBackoff",
        }
    }
}

impl Default for RestartStrategy {
    /// Returns [`RestartStrategy::ExponentialBackoff`].
    fn default() -> Self {
        RestartStrategy::ExponentialBackoff
    }
}

impl fmt::Display for RestartStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestartStrategy {
    type Err = RuntimeError;

    /// Parses a strategy name.
    ///
    /// Accepts the CamelCase names (`"ExponentialBackoff"`) as well as snake/kebab case
    /// (`"exponential_backoff"`, `"exponential-backoff"`). `CustomBackoff` cannot be parsed
    /// because it needs a function; use [`RestartPolicy::custom`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "immediate" => Ok(RestartStrategy::Immediate),
            "fixedbackoff" | "fixed" => Ok(RestartStrategy::FixedBackoff),
            "exponentialbackoff" | "exponential" => Ok(RestartStrategy::ExponentialBackoff),
            "linearbackoff" | "linear" => Ok(RestartStrategy::LinearBackoff),
            _ => Err(RuntimeError::InvalidRestartStrategy { value: s.to_string() }),
        }
    }
}

/// Backoff/jitter calculator for one supervised service.
///
/// Parameters are public; counters are private and only move through
/// [`backoff`](Self::backoff), [`jitter`](Self::jitter) and [`reset`](Self::reset).
#[derive(Clone, Debug)]
pub struct RestartPolicy {
    /// Strategy used by `backoff()`.
    pub strategy: RestartStrategy,
    /// Delay of [`RestartStrategy::FixedBackoff`].
    pub fixed_backoff: Duration,
    /// Cap for exponential and linear growth.
    pub max_backoff: Duration,
    /// Cap for exponential jitter.
    pub max_jitter: Duration,
    current_backoff: Duration,
    retry_attempts: u32,
}

impl RestartPolicy {
    /// Policy with the given strategy and default parameters (5s fixed, 60s max, 5s jitter).
    pub fn new(strategy: RestartStrategy) -> Self {
        Self {
            strategy,
            fixed_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            max_jitter: Duration::from_secs(5),
            current_backoff: SEED_BACKOFF,
            retry_attempts: 0,
        }
    }

    /// Shorthand for a [`RestartStrategy::CustomBackoff`] policy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> f64 + Send + Sync + 'static,
    {
        Self::new(RestartStrategy::CustomBackoff(CustomBackoff::new(f)))
    }

    /// Overrides the fixed delay.
    pub fn with_fixed_backoff(mut self, d: Duration) -> Self {
        self.fixed_backoff = d;
        self
    }

    /// Overrides the growth cap.
    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    /// Overrides the jitter cap.
    pub fn with_max_jitter(mut self, d: Duration) -> Self {
        self.max_jitter = d;
        self
    }

    /// Current backoff counter (the next exponential/linear delay before capping).
    pub fn current_backoff(&self) -> Duration {
        self.current_backoff
    }

    /// Number of restart attempts since the last reset.
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Computes the delay of the next restart attempt and advances the counters.
    ///
    /// Only [`RestartStrategy::CustomBackoff`] can fail.
    pub fn backoff(&mut self) -> Result<Duration, PolicyError> {
        match &self.strategy {
            RestartStrategy::Immediate => Ok(Duration::ZERO),
            RestartStrategy::FixedBackoff => Ok(self.fixed_backoff),
            RestartStrategy::ExponentialBackoff => {
                let delay = self.current_backoff.min(self.max_backoff);
                self.current_backoff = self.current_backoff.saturating_mul(2).min(self.max_backoff);
                Ok(delay)
            }
            RestartStrategy::LinearBackoff => {
                let delay = self.current_backoff.min(self.max_backoff);
                self.current_backoff = self.current_backoff.saturating_add(LINEAR_STEP).min(self.max_backoff);
                Ok(delay)
            }
            RestartStrategy::CustomBackoff(f) => f.delay(self.retry_attempts),
        }
    }

    /// Random extra delay for this attempt; counts the attempt.
    ///
    /// Uniform in `[0, min(max_jitter, current_backoff / 2)]` for the exponential strategy,
    /// zero otherwise.
    pub fn jitter(&mut self) -> Duration {
        self.retry_attempts = self.retry_attempts.saturating_add(1);
        match self.strategy {
            RestartStrategy::ExponentialBackoff => uniform_up_to(self.max_jitter.min(self.current_backoff / 2)),
            _ => Duration::ZERO,
        }
    }

    /// Restores the seed counters after a successful restart.
    ///
    /// No-op for strategies that do not escalate.
    pub fn reset(&mut self) {
        if matches!(
            self.strategy,
            RestartStrategy::ExponentialBackoff | RestartStrategy::LinearBackoff
        ) {
            self.current_backoff = SEED_BACKOFF;
            self.retry_attempts = 0;
        }
    }

    /// A copy with parameters kept and counters at their seed values.
    pub fn fresh(&self) -> Self {
        Self {
            current_backoff: SEED_BACKOFF,
            retry_attempts: 0,
            ..self.clone()
        }
    }
}

impl Default for RestartPolicy {
    /// Exponential backoff with default parameters.
    fn default() -> Self {
        Self::new(RestartStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(policy: &mut RestartPolicy, n: usize) -> Vec<u64> {
        (0..n).map(|_| policy.backoff().unwrap().as_secs()).collect()
    }

    #[test]
    fn test_exponential_sequence_caps_at_max() {
        let mut p = RestartPolicy::new(RestartStrategy::ExponentialBackoff);
        assert_eq!(secs(&mut p, 8), vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_linear_sequence_caps_at_max() {
        let mut p = RestartPolicy::new(RestartStrategy::LinearBackoff);
        let got = secs(&mut p, 62);
        let mut want: Vec<u64> = (1..=60).collect();
        want.extend([60, 60]);
        assert_eq!(got, want);
    }

    #[test]
    fn test_fixed_and_immediate_never_escalate() {
        let mut fixed = RestartPolicy::new(RestartStrategy::FixedBackoff);
        assert_eq!(secs(&mut fixed, 4), vec![5, 5, 5, 5]);

        let mut now = RestartPolicy::new(RestartStrategy::Immediate);
        assert_eq!(secs(&mut now, 3), vec![0, 0, 0]);
        assert_eq!(now.current_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_bounded_and_exponential_only() {
        let mut p = RestartPolicy::new(RestartStrategy::ExponentialBackoff);
        for _ in 0..20 {
            p.backoff().unwrap();
            let bound = p.max_jitter.min(p.current_backoff() / 2);
            let j = p.jitter();
            assert!(j <= bound, "jitter {j:?} above bound {bound:?}");
        }
        assert_eq!(p.retry_attempts(), 20);

        for strategy in [
            RestartStrategy::Immediate,
            RestartStrategy::FixedBackoff,
            RestartStrategy::LinearBackoff,
        ] {
            let mut p = RestartPolicy::new(strategy);
            for _ in 0..10 {
                p.backoff().unwrap();
                assert_eq!(p.jitter(), Duration::ZERO);
            }
        }
    }

    #[test]
    fn test_reset_restores_seed_for_growing_strategies() {
        for strategy in [RestartStrategy::ExponentialBackoff, RestartStrategy::LinearBackoff] {
            let mut p = RestartPolicy::new(strategy);
            for _ in 0..5 {
                p.backoff().unwrap();
                p.jitter();
            }
            assert!(p.current_backoff() > Duration::from_secs(1));
            p.reset();
            assert_eq!(p.current_backoff(), Duration::from_secs(1));
            assert_eq!(p.retry_attempts(), 0);
        }
    }

    #[test]
    fn test_reset_ignored_for_fixed() {
        let mut p = RestartPolicy::new(RestartStrategy::FixedBackoff);
        p.jitter();
        p.jitter();
        p.reset();
        assert_eq!(p.retry_attempts(), 2);
    }

    #[test]
    fn test_custom_sees_attempt_count() {
        let mut p = RestartPolicy::custom(|attempt| attempt as f64 * 0.5);
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(p.backoff().unwrap());
            assert_eq!(p.jitter(), Duration::ZERO);
        }
        assert_eq!(
            got,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_millis(1500)
            ]
        );
    }

    #[test]
    fn test_custom_rejects_invalid_delays() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let mut p = RestartPolicy::custom(move |_| bad);
            assert!(matches!(p.backoff(), Err(PolicyError::InvalidDelay { .. })));
        }
    }

    #[test]
    fn test_parse_strategy_names() {
        assert!(matches!(
            "ExponentialBackoff".parse::<RestartStrategy>().unwrap(),
            RestartStrategy::ExponentialBackoff
        ));
        assert!(matches!(
            "linear-backoff".parse::<RestartStrategy>().unwrap(),
            RestartStrategy::LinearBackoff
        ));
        assert!(matches!(
            "fixed_backoff".parse::<RestartStrategy>().unwrap(),
            RestartStrategy::FixedBackoff
        ));
        let err = "CustomBackoff".parse::<RestartStrategy>().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_restart_strategy");
        assert!("sometimes".parse::<RestartStrategy>().is_err());
    }

    #[test]
    fn test_fresh_keeps_parameters() {
        let mut p = RestartPolicy::new(RestartStrategy::LinearBackoff).with_max_backoff(Duration::from_secs(3));
        secs(&mut p, 5);
        let f = p.fresh();
        assert_eq!(f.max_backoff, Duration::from_secs(3));
        assert_eq!(f.current_backoff(), Duration::from_secs(1));
    }
}
