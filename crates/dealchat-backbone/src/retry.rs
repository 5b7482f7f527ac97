use std::future::Future;
use std::time::Duration;

/// Bounded retry with linear backoff: after failed attempt `n` the policy
/// waits `n * step` before attempt `n + 1`. No wait follows the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

/// Room creation: 3 attempts, 1s then 2s between them.
pub const ROOM_CREATION: RetryPolicy = RetryPolicy::linear(3, Duration::from_secs(1));

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, step: Duration) -> Self {
        Self { max_attempts, step }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    /// Runs `op(attempt)` (attempts are numbered from 1) until it succeeds or
    /// the attempts are exhausted; returns the last error in that case.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(_) => {
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_linear_backoff() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<&str, &str> = ROOM_CREATION
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt < 3 { Err("down") } else { Ok("!room:hs") } }
            })
            .await;

        assert_eq!(result, Ok("!room:hs"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), u32> = ROOM_CREATION
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(attempt) }
            })
            .await;

        assert_eq!(result, Err(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s between attempts, nothing after the last one
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn first_success_does_not_wait() {
        let policy = RetryPolicy::linear(5, Duration::from_secs(60));
        let result: Result<u32, ()> = policy.run(|attempt| async move { Ok(attempt) }).await;
        assert_eq!(result, Ok(1));
    }
}
