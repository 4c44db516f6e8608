use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use crate::core::UploadError;

/// Automatic retry budget and exponential backoff for one task.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大自动重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (0-based): `initial * multiplier^attempt`.
    pub fn get_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial.as_secs_f64() * self.multiplier.powf(attempt as f64);
        // 先在浮点数上封顶，超大的指数会让 from_secs_f64 溢出
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(delay).unwrap_or(self.max_delay)
    }

    pub fn should_retry(&self, error: &UploadError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retriable()
    }
}

/// Waits for `delay` unless `token` fires first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.get_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.get_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.get_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_is_capped_for_large_attempts() {
        let policy = RetryPolicy { max_retries: 100, ..Default::default() };
        assert_eq!(policy.get_delay(64), policy.max_delay);
        assert_eq!(policy.get_delay(70), policy.max_delay);
        assert_eq!(policy.get_delay(u32::MAX), policy.max_delay);
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::default();
        let err = UploadError::from_status(503, b"");

        assert!(policy.should_retry(&err, 0));
        assert!(policy.should_retry(&err, 1));
        assert!(!policy.should_retry(&err, 2));
        assert!(!policy.should_retry(&UploadError::from_status(404, b""), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(1), &token).await);

        let child = token.clone();
        let waiter = tokio::spawn(async move {
            sleep_or_cancel(Duration::from_secs(3600), &child).await
        });
        token.cancel();
        assert!(!waiter.await.unwrap());
    }
}
