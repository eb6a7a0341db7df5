//! Bounded retry with linear backoff and jitter for native primitive creation.

use rand::Rng;
use std::thread;
use std::time::Duration;

/// Attempts made before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Backoff step between attempts; attempt `n` waits `n * BASE_DELAY` plus jitter.
pub const BASE_DELAY: Duration = Duration::from_millis(20);

/// Delay before retrying after `attempt` (1-based) failed.
pub fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..BASE_DELAY.as_millis() as u64);
    BASE_DELAY * attempt + Duration::from_millis(jitter)
}

/// Run `operation` until it succeeds or `MAX_ATTEMPTS` is reached.
///
/// `on_retry` is called with the attempt number and error before each sleep.
/// The last error is returned on exhaustion.
pub fn with_retry<T, E, F, R>(mut operation: F, mut on_retry: R) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: FnMut(u32, &E),
{
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                on_retry(attempt, &e);
                thread::sleep(backoff_delay(attempt));
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_within_jitter() {
        for attempt in 1..=MAX_ATTEMPTS {
            let delay = backoff_delay(attempt);
            assert!(delay >= BASE_DELAY * attempt);
            assert!(delay < BASE_DELAY * (attempt + 1));
        }
    }

    #[test]
    fn succeeds_without_retry() {
        let mut retries = 0;
        let result: Result<u32, String> = with_retry(|| Ok(7), |_, _| retries += 1);

        assert_eq!(result, Ok(7));
        assert_eq!(retries, 0);
    }

    #[test]
    fn retries_until_success() {
        let mut calls = 0;
        let mut retried = Vec::new();
        let result: Result<&str, String> = with_retry(
            || {
                calls += 1;
                if calls < 3 {
                    Err(format!("failure {}", calls))
                } else {
                    Ok("created")
                }
            },
            |attempt, _| retried.push(attempt),
        );

        assert_eq!(result, Ok("created"));
        assert_eq!(calls, 3);
        assert_eq!(retried, vec![1, 2]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry(
            || {
                calls += 1;
                Err(format!("failure {}", calls))
            },
            |_, _| {},
        );

        assert_eq!(result, Err(format!("failure {}", MAX_ATTEMPTS)));
        assert_eq!(calls, MAX_ATTEMPTS);
    }
}
