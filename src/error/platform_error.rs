//! 平台统一错误类型

use super::code::ErrorCode;
use crate::balancer::PickError;
use std::time::Duration;
use thiserror::Error;

/// 服务注册、发现与负载均衡的统一错误类型
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    /// etcd 前缀非法（包含 `//`）
    #[error("{0:?}: prefix contains «//»")]
    InvalidPrefix(String),

    /// 目标服务名为空或包含 `/`
    #[error("{0:?}: target is empty or contains «/»")]
    InvalidTargetName(String),

    /// 服务端名称为空或包含 `/`
    #[error("{0:?}: name is empty or contains «/»")]
    InvalidServerName(String),

    /// 协调存储返回的错误（网络、集群不可用等）
    #[error("store error: {0}")]
    Store(String),

    /// 单次存储请求超时
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// 租约不存在（已过期或被撤销）
    #[error("lease {0} not found")]
    LeaseNotFound(i64),

    /// 条件事务未成功，实例键已经存在
    #[error("publish of {0} did not succeed: key already exists")]
    PublishConflict(String),

    /// 服务端取消了 watch（例如 revision 已被压缩）
    #[error("watch canceled: {0}")]
    WatchCanceled(String),

    /// 首个成员快照到达前发现流已关闭
    #[error("membership stream for {0} closed before the first snapshot")]
    LookupClosed(String),

    /// 选择连接失败
    #[error(transparent)]
    Pick(#[from] PickError),

    /// 建立连接失败
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// 负载均衡器已关闭
    #[error("balancer for {0} is closed")]
    BalancerClosed(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl PlatformError {
    /// 创建存储错误
    pub fn store(msg: impl Into<String>) -> Self {
        PlatformError::Store(msg.into())
    }

    /// 创建超时错误
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        PlatformError::Timeout { operation, timeout }
    }

    /// 创建连接错误
    pub fn connect(address: impl Into<String>, reason: impl ToString) -> Self {
        PlatformError::Connect {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            PlatformError::InvalidPrefix(_)
            | PlatformError::InvalidTargetName(_)
            | PlatformError::InvalidServerName(_) => ErrorCode::InvalidParameter,
            PlatformError::Store(_) => ErrorCode::StoreUnavailable,
            PlatformError::Timeout {
                operation: "connect",
                ..
            } => ErrorCode::ConnectionTimeout,
            PlatformError::Timeout { .. } => ErrorCode::StoreTimeout,
            PlatformError::LeaseNotFound(_) => ErrorCode::LeaseNotFound,
            PlatformError::PublishConflict(_) => ErrorCode::PublishConflict,
            PlatformError::WatchCanceled(_) => ErrorCode::WatchCanceled,
            PlatformError::LookupClosed(_) => ErrorCode::LookupClosed,
            PlatformError::Pick(PickError::NoSubchannelAvailable) => ErrorCode::NoSubchannelAvailable,
            PlatformError::Pick(PickError::NoServerAvailable) => ErrorCode::NoServerAvailable,
            PlatformError::Connect { .. } => ErrorCode::ConnectionFailed,
            PlatformError::BalancerClosed(_) => ErrorCode::ConnectionClosed,
            PlatformError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, PlatformError>;
