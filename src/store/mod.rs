//! 协调存储抽象
//!
//! 注册与发现只依赖以下能力：前缀读取、带起始 revision 的前缀 watch、
//! 租约授予与续约，以及绑定租约的条件事务写入。
//! 生产环境使用 [`EtcdStore`]，测试和进程内场景使用 [`MemoryStore`]。

pub mod etcd;
pub mod memory;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// watch 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// 单个键的变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub key: String,
    /// DELETE 事件的值为空
    pub value: String,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: String::new(),
        }
    }
}

/// 同一 revision 内一起投递的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBatch {
    pub events: Vec<WatchEvent>,
    pub revision: i64,
}

/// 一次前缀读取的结果
#[derive(Debug, Clone, Default)]
pub struct PrefixRead {
    pub kvs: Vec<(String, String)>,
    /// 读取时存储的 revision
    pub revision: i64,
}

/// 租约
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub id: i64,
    pub ttl: i64,
}

/// 续约应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseAck {
    pub id: i64,
    /// 剩余 TTL（秒）
    pub ttl: i64,
}

/// watch 流，存储错误以 `Err` 出现一次后流结束
pub type WatchStream = BoxStream<'static, Result<WatchBatch>>;

/// 续约流，租约丢失时结束
pub type KeepAliveStream = BoxStream<'static, Result<LeaseAck>>;

/// 协调存储 trait
///
/// 需要动态分发（`Arc<dyn CoordinationStore>`），所以使用 async-trait
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 一次一致性读取前缀下的所有键
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead>;

    /// 从 `from_revision` 开始监听前缀
    async fn watch_prefix(&self, prefix: &str, from_revision: i64) -> Result<WatchStream>;

    /// 授予一个 TTL 租约
    async fn grant(&self, ttl: i64) -> Result<Lease>;

    /// 持续续约，直到租约丢失
    async fn keep_alive(&self, lease_id: i64) -> Result<KeepAliveStream>;

    /// 在一个条件事务中写入所有键并绑定租约
    ///
    /// 仅当 `guard_key` 不存在时成功；返回事务是否成功。
    async fn publish(&self, lease_id: i64, guard_key: &str, kvs: Vec<(String, String)>) -> Result<bool>;

    /// 撤销租约，绑定的键随之删除
    async fn revoke(&self, lease_id: i64) -> Result<()>;
}
