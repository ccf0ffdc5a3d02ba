use std::time::{Duration, Instant};

/// Configuration for retry behavior with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap (backoff won't exceed this)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt using exponential backoff
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Retry a function with exponential backoff
///
/// Only errors for which `is_retryable` returns true are retried. When a
/// `deadline` is given, no sleep is started that would end past it; the last
/// error is returned instead.
///
/// # Arguments
/// * `f` - The function to retry
/// * `policy` - Attempt count and backoff shape
/// * `deadline` - Optional point in time after which no retry is attempted
/// * `operation_name` - Human-readable name for logging
/// * `is_retryable` - Classifies errors as transient
pub fn retry_with_backoff<F, T, E, P>(
    mut f: F,
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    operation_name: &str,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let e = match f() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(e);
        }

        if attempt + 1 >= max_attempts {
            tracing::error!(
                "{} failed after {} attempts: {}",
                operation_name,
                max_attempts,
                e
            );
            return Err(e);
        }

        let delay = policy.delay_for_attempt(attempt);
        if let Some(deadline) = deadline
            && Instant::now() + delay > deadline
        {
            tracing::warn!(
                "{} failed (attempt {}/{}): {}. Deadline leaves no room to retry",
                operation_name,
                attempt + 1,
                max_attempts,
                e
            );
            return Err(e);
        }

        tracing::warn!(
            "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
            operation_name,
            attempt + 1,
            max_attempts,
            e,
            delay.as_millis()
        );
        std::thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_micros(50),
            max_delay: Duration::from_micros(500),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_micros(50));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_micros(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_micros(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_micros(400));
        // Capped at 500µs
        assert_eq!(policy.delay_for_attempt(4), Duration::from_micros(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_micros(500));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result: Result<&str, String> = retry_with_backoff(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("flaky".to_string())
                } else {
                    Ok("done")
                }
            },
            &fast_policy(5),
            None,
            "flaky op",
            |_| true,
        );

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_retryable_error_returns_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_backoff(
            || {
                calls.set(calls.get() + 1);
                Err("permanent".to_string())
            },
            &fast_policy(5),
            None,
            "permanent op",
            |e| e != "permanent",
        );

        assert!(result.is_err());
        assert_eq!(calls.get(), 1, "Non-retryable errors must not be retried");
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_backoff(
            || {
                calls.set(calls.get() + 1);
                Err("down".to_string())
            },
            &fast_policy(4),
            None,
            "down op",
            |_| true,
        );

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_expired_deadline_stops_retrying() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
        };
        let result: Result<(), String> = retry_with_backoff(
            || {
                calls.set(calls.get() + 1);
                Err("slow".to_string())
            },
            &policy,
            Some(Instant::now() + Duration::from_millis(10)),
            "slow op",
            |_| true,
        );

        assert!(result.is_err());
        assert_eq!(calls.get(), 1, "A 1s backoff cannot fit a 10ms deadline");
    }

    #[test]
    fn test_none_policy_runs_once() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
