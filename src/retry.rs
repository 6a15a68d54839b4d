use std::future::Future;
use std::time::Duration;

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type RetryObserver<E> = Box<dyn Fn(&E, u32) + Send + Sync>;

/// Bounded exponential backoff: `base_delay * 2^(attempt-1)` between failed
/// attempts, no jitter, no cap.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_delay: Duration,
    should_retry: Option<RetryPredicate<E>>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E> RetryPolicy<E> {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            should_retry: None,
            on_retry: None,
        }
    }

    /// Failures rejected by `predicate` propagate immediately.
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Called with the error and 1-based attempt number before each backoff.
    pub fn on_retry(mut self, observer: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, attempt)
    }
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Run `op` until it succeeds, the policy rejects the failure, or attempts run
/// out. The last error is returned unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy<E>, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= policy.max_attempts {
            return Err(err);
        }
        if let Some(should_retry) = &policy.should_retry {
            if !should_retry(&err) {
                return Err(err);
            }
        }
        if let Some(on_retry) = &policy.on_retry {
            on_retry(&err, attempt);
        }

        tokio::time::sleep(policy.delay_after(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::<String>::new(3, Duration::from_millis(10));

        let result = with_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("ok")
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result = with_retry(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("fail".to_string())
            } else {
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_with_doubling_delays() {
        let calls = AtomicU32::new(0);
        let retries = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::clone(&retries);
        let policy = RetryPolicy::new(3, Duration::from_millis(2000)).on_retry(move |err: &String, attempt| {
            observed.lock().unwrap().push((err.clone(), attempt, Instant::now()));
        });

        let start = Instant::now();
        let result: Result<(), String> = with_retry(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("always fails #{}", n))
        })
        .await;

        // The last error comes back unchanged
        assert_eq!(result, Err("always fails #3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let retries = retries.lock().unwrap();
        assert_eq!(retries.len(), 2);
        assert_eq!(retries[0].0, "always fails #1");
        assert_eq!(retries[0].1, 1);
        assert_eq!(retries[1].1, 2);

        let first_delay = retries[1].2 - retries[0].2;
        let second_delay = start.elapsed() - (retries[1].2 - start);
        assert_eq!(first_delay, Duration::from_millis(2000));
        assert_eq!(second_delay, Duration::from_millis(4000));
        assert_eq!(second_delay, first_delay * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let predicate_calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&predicate_calls);
        let policy = RetryPolicy::new(3, Duration::from_millis(10)).retry_if(move |_: &String| {
            counted.fetch_add(1, Ordering::SeqCst);
            false
        });

        let result: Result<(), String> = with_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("not retryable".to_string())
        })
        .await;

        assert_eq!(result, Err("not retryable".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(predicate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        let result: Result<(), &str> = with_retry(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        assert!(backoff_delay(base, 200) >= Duration::from_secs(u64::from(u32::MAX)));
    }
}
