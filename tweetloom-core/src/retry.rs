//! Bounded retry with exponential backoff.
//!
//! Used for the outbound LLM call. Retry policy lives here, above the
//! extractor and calendar store, which never retry on their own.

use std::fmt::Display;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Errors that know whether retrying the same operation can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Factor applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Upper bound on a single delay
    pub max_delay: Duration,
    /// Scale each delay by a uniform factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Run `op`, retrying failures for which [`Retryable::is_retryable`] holds.
    ///
    /// `op` receives the 1-based attempt number. The final failure is returned
    /// unchanged; non-retryable failures return immediately.
    pub fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_when(op, |e: &E| e.is_retryable())
    }

    /// Like [`RetryPolicy::run`] with an explicit retryability predicate.
    pub fn run_when<T, E, F, P>(&self, op: F, should_retry: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        self.execute(op, should_retry, std::thread::sleep)
    }

    fn execute<T, E, F, P, S>(&self, mut op: F, should_retry: P, mut sleep: S) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut current_delay = self.initial_delay.min(self.max_delay);
        let mut attempt = 1;

        loop {
            let error = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&error) {
                tracing::debug!(attempt, error = %error, "Non-retryable failure");
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "Retries exhausted");
                return Err(error);
            }

            let wait = self.jittered(current_delay);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = wait.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            sleep(wait);

            current_delay = current_delay
                .mul_f64(self.backoff_multiplier.max(1.0))
                .min(self.max_delay);
            attempt += 1;
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient(u32),
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient(_))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(250),
            jitter: false,
        }
    }

    #[test]
    fn succeeds_after_k_failures_with_k_delays() {
        let mut sleeps = Vec::new();
        let result = policy().execute(
            |attempt| {
                if attempt <= 2 {
                    Err(TestError::Transient(attempt))
                } else {
                    Ok(attempt)
                }
            },
            TestError::is_retryable,
            |d| sleeps.push(d),
        );

        assert_eq!(result, Ok(3));
        assert_eq!(
            sleeps,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn exhausted_retries_return_last_original_error() {
        let mut calls = 0;
        let mut sleeps = Vec::new();
        let result: Result<(), _> = policy().execute(
            |attempt| {
                calls += 1;
                Err(TestError::Transient(attempt))
            },
            TestError::is_retryable,
            |d| sleeps.push(d),
        );

        assert_eq!(result, Err(TestError::Transient(4)));
        assert_eq!(calls, 4);
        // Capped at max_delay
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250)
            ]
        );
    }

    #[test]
    fn non_retryable_short_circuits() {
        let mut calls = 0;
        let mut sleeps = 0;
        let result: Result<(), _> = policy().execute(
            |_| {
                calls += 1;
                Err(TestError::Fatal)
            },
            TestError::is_retryable,
            |_| sleeps += 1,
        );

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls, 1);
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy()
        };
        let base = Duration::from_millis(200);
        for _ in 0..200 {
            let wait = policy.jittered(base);
            assert!(wait >= base / 2 && wait <= base, "jittered delay {wait:?}");
        }
    }

    #[test]
    fn single_attempt_policy_never_sleeps() {
        let mut sleeps = 0;
        let result: Result<(), _> = RetryPolicy::immediate(1).execute(
            |a| Err(TestError::Transient(a)),
            TestError::is_retryable,
            |_| sleeps += 1,
        );
        assert_eq!(result, Err(TestError::Transient(1)));
        assert_eq!(sleeps, 0);
    }

    #[test]
    fn run_uses_retryable_trait() {
        let result = RetryPolicy::immediate(3).run(|attempt| {
            if attempt < 3 {
                Err(TestError::Transient(attempt))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
    }
}
