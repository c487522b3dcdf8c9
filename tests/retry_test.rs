//! 重试策略测试

use flare_rpc_platform::error::PlatformError;
use flare_rpc_platform::retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};
use std::time::Duration;

/// 测试：固定延迟策略默认无限重试
#[test]
fn test_fixed_policy_retries_forever_unless_limited() {
    let err = PlatformError::store("down");
    let policy = FixedRetryPolicy::new(Duration::from_millis(250));
    assert!(policy.should_retry(10_000, &err));
    assert_eq!(policy.backoff_duration(7), Duration::from_millis(250));
    assert_eq!(policy.max_attempts(), None);

    let limited = policy.with_max_attempts(2);
    assert!(limited.should_retry(1, &err));
    assert!(!limited.should_retry(2, &err));
}

/// 测试：指数退避每次翻倍，不超过上限
#[test]
fn test_exponential_backoff_doubles_up_to_the_cap() {
    let policy = ExponentialBackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
    assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
    assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
    assert_eq!(policy.backoff_duration(3), Duration::from_millis(800));
    assert_eq!(policy.backoff_duration(4), Duration::from_secs(1));
    assert_eq!(policy.backoff_duration(60), Duration::from_secs(1));
}

/// 测试：指数退避不重试终止性错误
#[test]
fn test_exponential_backoff_skips_terminal_errors() {
    let policy = ExponentialBackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
    assert!(policy.should_retry(3, &PlatformError::connect("10.0.0.1:80", "refused")));
    assert!(!policy.should_retry(0, &PlatformError::Config("bad".into())));

    let limited = policy.with_max_attempts(1);
    assert!(!limited.should_retry(1, &PlatformError::store("down")));
}
