//! 进程内协调存储
//!
//! 语义与 etcd 保持一致：全局递增 revision、前缀 watch 可从历史 revision 回放、
//! 租约到期后绑定的键在同一个 revision 内被删除。用于测试和单进程部署。

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{CoordinationStore, KeepAliveStream, Lease, LeaseAck, PrefixRead, WatchBatch, WatchEvent, WatchStream};
use crate::error::{PlatformError, Result};

/// 进程内协调存储
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    // 之后的 N 次请求返回注入的错误
    injected_failures: AtomicUsize,
}

#[derive(Default)]
struct State {
    revision: i64,
    next_lease_id: i64,
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<i64, LeaseEntry>,
    history: Vec<(i64, WatchEvent)>,
    watchers: Vec<WatcherEntry>,
}

struct Entry {
    value: String,
    lease: i64,
}

struct LeaseEntry {
    ttl: i64,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct WatcherEntry {
    prefix: String,
    tx: mpsc::UnboundedSender<Result<WatchBatch>>,
}

impl State {
    /// 在一个新 revision 内提交事件并通知 watcher
    fn commit(&mut self, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }

        self.revision += 1;
        let revision = self.revision;
        self.history
            .extend(events.iter().cloned().map(|event| (revision, event)));

        self.watchers.retain(|watcher| {
            let matched: Vec<WatchEvent> = events
                .iter()
                .filter(|event| event.key.starts_with(&watcher.prefix))
                .cloned()
                .collect();
            if matched.is_empty() {
                return !watcher.tx.is_closed();
            }
            watcher
                .tx
                .send(Ok(WatchBatch {
                    events: matched,
                    revision,
                }))
                .is_ok()
        });
    }

    fn put(&mut self, key: &str, value: &str, lease: i64, events: &mut Vec<WatchEvent>) {
        if let Some(old) = self.kvs.get(key) {
            if old.lease != 0 && old.lease != lease {
                if let Some(entry) = self.leases.get_mut(&old.lease) {
                    entry.keys.remove(key);
                }
            }
        }
        if lease != 0 {
            if let Some(entry) = self.leases.get_mut(&lease) {
                entry.keys.insert(key.to_string());
            }
        }
        self.kvs.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        events.push(WatchEvent::put(key, value));
    }

    fn delete(&mut self, key: &str, events: &mut Vec<WatchEvent>) {
        if let Some(old) = self.kvs.remove(key) {
            if let Some(entry) = self.leases.get_mut(&old.lease) {
                entry.keys.remove(key);
            }
            events.push(WatchEvent::delete(key));
        }
    }

    fn revoke(&mut self, lease_id: i64) -> bool {
        let Some(lease) = self.leases.remove(&lease_id) else {
            return false;
        };
        let mut events = Vec::new();
        for key in &lease.keys {
            if let Some(old) = self.kvs.remove(key) {
                debug_assert_eq!(old.lease, lease_id);
                events.push(WatchEvent::delete(key.as_str()));
            }
        }
        self.commit(events);
        true
    }
}

fn lock(inner: &Inner) -> MutexGuard<'_, State> {
    inner.state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.inner)
    }

    fn check_injected_failure(&self, operation: &str) -> Result<()> {
        let injected = self
            .inner
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(PlatformError::store(format!("injected failure in {operation}"))),
            Err(_) => Ok(()),
        }
    }

    /// 让之后的 `count` 次请求失败，模拟存储抖动
    pub fn fail_next_requests(&self, count: usize) {
        self.inner.injected_failures.store(count, Ordering::SeqCst);
    }

    /// 写入一个不绑定租约的键
    pub fn put(&self, key: &str, value: &str) {
        let mut state = self.state();
        let mut events = Vec::new();
        state.put(key, value, 0, &mut events);
        state.commit(events);
    }

    /// 删除一个键
    pub fn delete(&self, key: &str) {
        let mut state = self.state();
        let mut events = Vec::new();
        state.delete(key, &mut events);
        state.commit(events);
    }

    /// 在同一个 revision 内应用多个事件
    pub fn apply(&self, events: Vec<WatchEvent>) {
        let mut state = self.state();
        let mut committed = Vec::new();
        for event in events {
            match event.kind {
                super::EventKind::Put => state.put(&event.key, &event.value, 0, &mut committed),
                super::EventKind::Delete => state.delete(&event.key, &mut committed),
            }
        }
        state.commit(committed);
    }

    /// 读取单个键
    pub fn get(&self, key: &str) -> Option<String> {
        self.state().kvs.get(key).map(|entry| entry.value.clone())
    }

    /// 当前存活的租约
    pub fn leases(&self) -> Vec<i64> {
        let mut leases: Vec<i64> = self.state().leases.keys().copied().collect();
        leases.sort_unstable();
        leases
    }

    /// 当前 revision
    pub fn revision(&self) -> i64 {
        self.state().revision
    }

    /// 优雅关闭所有 watch 流
    pub fn close_watches(&self) {
        self.state().watchers.clear();
    }

    /// 以错误结束所有 watch 流
    pub fn fail_watches(&self, reason: &str) {
        let watchers = std::mem::take(&mut self.state().watchers);
        for watcher in watchers {
            let _ = watcher
                .tx
                .send(Err(PlatformError::WatchCanceled(reason.to_string())));
        }
    }

    fn spawn_reaper(&self, lease_id: i64) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(inner) = weak.upgrade() else { return };
                    let state = lock(&inner);
                    match state.leases.get(&lease_id) {
                        Some(lease) => lease.deadline,
                        None => return,
                    }
                };

                tokio::time::sleep_until(deadline).await;

                let Some(inner) = weak.upgrade() else { return };
                let mut state = lock(&inner);
                let expired = match state.leases.get(&lease_id) {
                    Some(lease) => lease.deadline <= Instant::now(),
                    None => return,
                };
                if expired {
                    debug!(lease_id, "Lease expired");
                    state.revoke(lease_id);
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead> {
        self.check_injected_failure("get")?;
        let state = self.state();
        let kvs = state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();

        Ok(PrefixRead {
            kvs,
            revision: state.revision,
        })
    }

    async fn watch_prefix(&self, prefix: &str, from_revision: i64) -> Result<WatchStream> {
        self.check_injected_failure("watch")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();

        // 回放 from_revision 之后的历史
        let mut replay: Vec<WatchBatch> = Vec::new();
        for (revision, event) in &state.history {
            if *revision < from_revision || !event.key.starts_with(prefix) {
                continue;
            }
            match replay.last_mut() {
                Some(batch) if batch.revision == *revision => batch.events.push(event.clone()),
                _ => replay.push(WatchBatch {
                    events: vec![event.clone()],
                    revision: *revision,
                }),
            }
        }
        for batch in replay {
            let _ = tx.send(Ok(batch));
        }

        state.watchers.push(WatcherEntry {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn grant(&self, ttl: i64) -> Result<Lease> {
        self.check_injected_failure("grant")?;
        let id = {
            let mut state = self.state();
            state.next_lease_id += 1;
            let id = state.next_lease_id;
            state.leases.insert(
                id,
                LeaseEntry {
                    ttl,
                    deadline: Instant::now() + Duration::from_secs(ttl.max(1) as u64),
                    keys: BTreeSet::new(),
                },
            );
            id
        };
        self.spawn_reaper(id);
        Ok(Lease { id, ttl })
    }

    async fn keep_alive(&self, lease_id: i64) -> Result<KeepAliveStream> {
        self.check_injected_failure("keep_alive")?;
        let ttl = match self.state().leases.get(&lease_id) {
            Some(lease) => lease.ttl,
            None => return Err(PlatformError::LeaseNotFound(lease_id)),
        };
        let interval = Duration::from_millis(ttl.max(1) as u64 * 1000 / 3);
        let weak = Arc::downgrade(&self.inner);

        let stream = futures::stream::unfold(true, move |first| {
            let weak = weak.clone();
            async move {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                let inner = weak.upgrade()?;
                let mut state = lock(&inner);
                let lease = state.leases.get_mut(&lease_id)?;
                lease.deadline = Instant::now() + Duration::from_secs(lease.ttl.max(1) as u64);
                let ack = LeaseAck {
                    id: lease_id,
                    ttl: lease.ttl,
                };
                Some((Ok(ack), false))
            }
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, lease_id: i64, guard_key: &str, kvs: Vec<(String, String)>) -> Result<bool> {
        self.check_injected_failure("txn")?;
        let mut state = self.state();
        if !state.leases.contains_key(&lease_id) {
            return Err(PlatformError::LeaseNotFound(lease_id));
        }
        if state.kvs.contains_key(guard_key) {
            return Ok(false);
        }

        let mut events = Vec::with_capacity(kvs.len());
        for (key, value) in &kvs {
            state.put(key, value, lease_id, &mut events);
        }
        state.commit(events);
        Ok(true)
    }

    async fn revoke(&self, lease_id: i64) -> Result<()> {
        self.check_injected_failure("revoke")?;
        if self.state().revoke(lease_id) {
            Ok(())
        } else {
            Err(PlatformError::LeaseNotFound(lease_id))
        }
    }
}
