use std::{fmt::Display, time::Duration};

use tracing::{debug, warn};

use crate::result::Result;

/// Bounded retry with exponential backoff.
///
/// Before attempt `n + 1` (for `n >= 1`), the policy sleeps `base_delay * 2^n`.
/// There is no sleep before the first attempt nor after the last one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-indexed)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run the operation until it succeeds, fails permanently, or the attempts are exhausted.
    ///
    /// The operation receives the attempt number, starting at 1.
    /// Return `None` if the operation could not succeed, each failure having been logged.
    pub fn run<T, D, F>(&self, what: D, op: F) -> Option<T>
    where
        D: Display,
        F: FnMut(u32) -> Result<T>,
    {
        self.run_with_sleep(what, op, std::thread::sleep)
    }

    /// Same as [`RetryPolicy::run`] but with a custom way of waiting between attempts
    pub fn run_with_sleep<T, D, F, S>(&self, what: D, mut op: F, mut sleep: S) -> Option<T>
    where
        D: Display,
        F: FnMut(u32) -> Result<T>,
        S: FnMut(Duration),
    {
        for attempt in 1..=self.max_attempts {
            match op(attempt) {
                Ok(value) => return Some(value),
                Err(err) if err.is_permanent() => {
                    warn!(attempt, "{what}: {err}. Not retrying");
                    return None;
                }
                Err(err) => {
                    warn!(attempt, max_attempts = self.max_attempts, "{what}: {err}");

                    if attempt < self.max_attempts {
                        let delay = self.delay_after(attempt);
                        debug!("{what}: retrying in {}s", delay.as_secs_f32());
                        sleep(delay);
                    }
                }
            }
        }

        warn!("{what}: giving up after {} attempts", self.max_attempts);
        None
    }
}

#[cfg(test)]
mod tests {
    use miette::miette;

    use super::*;
    use crate::result::Error;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(10))
    }

    #[test]
    fn delays_double() {
        let policy = policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(20));
        assert_eq!(policy.delay_after(2), Duration::from_millis(40));
        assert_eq!(
            RetryPolicy::new(3, Duration::from_secs(u64::MAX)).delay_after(40),
            Duration::MAX
        );
    }

    #[test]
    fn first_success_does_not_sleep() {
        let mut sleeps = vec![];
        let res = policy().run_with_sleep("op", |_| Ok(42), |d| sleeps.push(d));

        assert_eq!(res, Some(42));
        assert!(sleeps.is_empty());
    }

    #[test]
    fn transient_failures_then_success() {
        let mut sleeps = vec![];
        let mut attempts = 0;
        let res = policy().run_with_sleep(
            "op",
            |attempt| {
                attempts += 1;
                if attempt < 3 {
                    Err(miette!("network blip").into())
                } else {
                    Ok("text")
                }
            },
            |d| sleeps.push(d),
        );

        assert_eq!(res, Some("text"));
        assert_eq!(attempts, 3);
        assert_eq!(
            sleeps,
            [Duration::from_millis(20), Duration::from_millis(40)]
        );
    }

    #[test]
    fn exhausted_attempts_are_not_an_error() {
        let mut sleeps = 0;
        let mut attempts = 0;
        let res: Option<()> = policy().run_with_sleep(
            "op",
            |_| {
                attempts += 1;
                Err(miette!("still down").into())
            },
            |_| sleeps += 1,
        );

        assert_eq!(res, None);
        assert_eq!(attempts, 3);
        // No sleep after the last attempt
        assert_eq!(sleeps, 2);
    }

    #[test]
    fn permanent_failure_short_circuits() {
        let mut sleeps = 0;
        let mut attempts = 0;
        let res: Option<()> = policy().run_with_sleep(
            "op",
            |_| {
                attempts += 1;
                Err(Error::Unavailable)
            },
            |_| sleeps += 1,
        );

        assert_eq!(res, None);
        assert_eq!(attempts, 1);
        assert_eq!(sleeps, 0);
    }
}
