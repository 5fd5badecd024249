/// Bounded retry with a fixed delay between attempts
///
/// Shared by the exec gateway (transient channel failures) and the readiness
/// poll after start.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

/// Result of the last attempt together with how many attempts were made
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// Remote exec: 5 attempts, one minute apart
    pub fn exec_default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// Readiness after start: 5 checks, 10 seconds apart
    pub fn readiness_default() -> Self {
        Self::new(5, Duration::from_secs(10))
    }

    /// Runs `op` until it succeeds or the attempts are used up.
    ///
    /// `op` receives the 1-based attempt number. The delay is only slept between
    /// attempts, never after the last one.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Attempted<Result<T, E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        value: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) if attempt >= self.max_attempts => {
                    return Attempted {
                        value: Err(err),
                        attempts: attempt,
                    }
                }
                Err(err) => {
                    warn!(
                        op = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        retry_in = %humantime::format_duration(self.interval),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.interval).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exec_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let outcome = quick(5)
            .run("flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt * 10)
                    }
                }
            })
            .await;

        assert_eq!(outcome.value.unwrap(), 30);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: Attempted<Result<(), String>> = quick(4)
            .run("broken", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;

        assert_eq!(outcome.value.unwrap_err(), "boom");
        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::exec_default().interval, Duration::from_secs(60));
    }
}
