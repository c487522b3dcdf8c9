//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 注册中心（协调存储）相关错误
/// - 3000-3999: 负载均衡相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,

    // ============================================================
    // 注册中心相关错误 (2000-2999)
    // ============================================================
    StoreUnavailable = 2000,
    StoreTimeout = 2001,
    LeaseNotFound = 2002,
    PublishConflict = 2003,
    WatchCanceled = 2004,
    LookupClosed = 2005,

    // ============================================================
    // 负载均衡相关错误 (3000-3999)
    // ============================================================
    NoSubchannelAvailable = 3000,
    NoServerAvailable = 3001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    InvalidParameter = 9001,
    ConfigurationError = 9002,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::StoreTimeout => "STORE_TIMEOUT",
            ErrorCode::LeaseNotFound => "LEASE_NOT_FOUND",
            ErrorCode::PublishConflict => "PUBLISH_CONFLICT",
            ErrorCode::WatchCanceled => "WATCH_CANCELED",
            ErrorCode::LookupClosed => "LOOKUP_CLOSED",
            ErrorCode::NoSubchannelAvailable => "NO_SUBCHANNEL_AVAILABLE",
            ErrorCode::NoServerAvailable => "NO_SERVER_AVAILABLE",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Registry,
            3000..=3999 => ErrorCategory::Balancer,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 注册与发现循环对这些错误无限重试；调用方拿到它们时也可以稍后重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::StoreUnavailable
                | ErrorCode::StoreTimeout
                | ErrorCode::LeaseNotFound
                | ErrorCode::PublishConflict
                | ErrorCode::NoSubchannelAvailable
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Registry,
    Balancer,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Balancer => write!(f, "BALANCER"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
