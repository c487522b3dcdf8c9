use super::{RetryPolicy, within_attempts};
use crate::error::PlatformError;
use std::time::Duration;

/// 指数退避重试策略
///
/// 延迟为 `base_delay * 2^attempt`，不超过 `max_delay`。默认不限制次数。
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_attempts: Option<usize>,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay,
            max_delay,
        }
    }

    /// 限制最大尝试次数
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &PlatformError) -> bool {
        if !within_attempts(self.max_attempts, attempt) {
            return false;
        }

        // 只对可重试的错误进行重试
        error.is_retryable()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay = self.base_delay.saturating_mul(1 << attempt.min(10));
        delay.min(self.max_delay)
    }

    fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }
}

