use super::{RetryPolicy, within_attempts};
use crate::error::PlatformError;
use std::time::Duration;

/// 固定延迟重试策略
///
/// 默认不限制次数，对所有错误重试。
#[derive(Debug, Clone)]
pub struct FixedRetryPolicy {
    max_attempts: Option<usize>,
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// 限制最大尝试次数
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn should_retry(&self, attempt: usize, _error: &PlatformError) -> bool {
        within_attempts(self.max_attempts, attempt)
    }

    fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> Option<usize> {
        self.max_attempts
    }
}

