//! 重试策略模块
//!
//! 注册循环使用固定延迟，连接重建使用指数退避。

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedRetryPolicy;

use std::time::Duration;

use crate::error::PlatformError;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    /// 第 `attempt` 次失败后是否继续重试（从 0 开始计数）
    fn should_retry(&self, attempt: usize, error: &PlatformError) -> bool;

    /// 第 `attempt` 次失败后的等待时间
    fn backoff_duration(&self, attempt: usize) -> Duration;

    /// 最大尝试次数，`None` 表示不限制
    fn max_attempts(&self) -> Option<usize>;
}

fn within_attempts(max_attempts: Option<usize>, attempt: usize) -> bool {
    max_attempts.is_none_or(|max| attempt < max)
}
