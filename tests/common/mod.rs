//! 测试用的连接器与服务

#![allow(dead_code)]

use async_trait::async_trait;
use flare_rpc_platform::store::{CoordinationStore, KeepAliveStream, Lease, MemoryStore, PrefixRead, WatchStream};
use flare_rpc_platform::{Connector, PlatformError, Result};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// 回显地址的假连接
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EchoService {
    pub address: String,
}

impl tower::Service<String> for EchoService {
    type Response = String;
    type Error = Infallible;
    type Future = futures::future::Ready<std::result::Result<String, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: String) -> Self::Future {
        futures::future::ready(Ok(format!("{} <- {}", self.address, req)))
    }
}

#[derive(Default)]
struct FakeState {
    refused: HashSet<String>,
    attempts: HashMap<String, usize>,
    links: HashMap<String, CancellationToken>,
}

/// 可控的假连接器：可以拒绝连接或断开已建立的连接
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn refuse(&self, address: &str) {
        self.state.lock().expect("lock").refused.insert(address.to_string());
    }

    pub fn accept(&self, address: &str) {
        self.state.lock().expect("lock").refused.remove(address);
    }

    /// 断开当前到 `address` 的连接
    pub fn kill(&self, address: &str) {
        if let Some(link) = self.state.lock().expect("lock").links.remove(address) {
            link.cancel();
        }
    }

    pub fn attempts(&self, address: &str) -> usize {
        self.state
            .lock()
            .expect("lock")
            .attempts
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    fn link(&self, address: &str) -> CancellationToken {
        self.state
            .lock()
            .expect("lock")
            .links
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = EchoService;

    async fn connect(&self, address: &str) -> Result<EchoService> {
        let refused = {
            let mut state = self.state.lock().expect("lock");
            *state.attempts.entry(address.to_string()).or_default() += 1;
            state.refused.contains(address)
        };
        if refused {
            return Err(PlatformError::connect(address, "connection refused"));
        }
        Ok(EchoService {
            address: address.to_string(),
        })
    }

    async fn disconnected(&self, _address: &str, connection: &EchoService) {
        self.link(&connection.address).cancelled().await
    }
}

/// 可以让续约流或 watch 卡住的存储，其余请求交给内部的 [`MemoryStore`]
#[derive(Clone, Default)]
pub struct StallingStore {
    inner: MemoryStore,
    stalled_keep_alives: Arc<AtomicUsize>,
    hang_watches: Arc<AtomicBool>,
}

impl StallingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// 之后的 `count` 个续约流在第一个应答之后不再产出，也不结束
    pub fn stall_keep_alives(&self, count: usize) {
        self.stalled_keep_alives.store(count, Ordering::SeqCst);
    }

    /// 之后打开 watch 的请求永不返回
    pub fn hang_watches(&self) {
        self.hang_watches.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationStore for StallingStore {
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead> {
        self.inner.get_prefix(prefix).await
    }

    async fn watch_prefix(&self, prefix: &str, from_revision: i64) -> Result<WatchStream> {
        if self.hang_watches.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.inner.watch_prefix(prefix, from_revision).await
    }

    async fn grant(&self, ttl: i64) -> Result<Lease> {
        self.inner.grant(ttl).await
    }

    async fn keep_alive(&self, lease_id: i64) -> Result<KeepAliveStream> {
        let acks = self.inner.keep_alive(lease_id).await?;
        let stall = self
            .stalled_keep_alives
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            Ok(acks.take(1).chain(futures::stream::pending()).boxed())
        } else {
            Ok(acks)
        }
    }

    async fn publish(&self, lease_id: i64, guard_key: &str, kvs: Vec<(String, String)>) -> Result<bool> {
        self.inner.publish(lease_id, guard_key, kvs).await
    }

    async fn revoke(&self, lease_id: i64) -> Result<()> {
        self.inner.revoke(lease_id).await
    }
}
