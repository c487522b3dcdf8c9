//! 成员解析器
//!
//! 先对服务目录做一次一致性读取，得到首个快照和 revision R，
//! 再从 R+1 开始 watch。每个事件批次完整应用后重新分组，成员有变化时发出新快照。

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::discovery::snapshot::{FlatMembership, MembershipSnapshot};
use crate::error::{PlatformError, Result};
use crate::store::{CoordinationStore, WatchStream};

/// 成员解析器
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn CoordinationStore>,
    request_timeout: Duration,
    channel_capacity: usize,
}

/// 成员快照流
///
/// - 正常结束（watch 关闭、取消、被丢弃）时流直接结束；
/// - 存储错误或服务端取消 watch 时，先产出一个 `Err`，随后结束。
///
/// 丢弃该流会停止后台 watch 任务。
pub struct MembershipStream {
    rx: mpsc::Receiver<Result<MembershipSnapshot>>,
    _guard: DropGuard,
}

impl MembershipStream {
    /// 等待下一个快照
    pub async fn next_snapshot(&mut self) -> Option<Result<MembershipSnapshot>> {
        self.rx.recv().await
    }
}

impl Stream for MembershipStream {
    type Item = Result<MembershipSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Resolver {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            request_timeout: Duration::from_secs(4),
            channel_capacity: 16,
        }
    }

    /// 使用客户端配置中的超时与通道容量
    pub fn from_config(store: Arc<dyn CoordinationStore>, config: &ClientConfig) -> Self {
        Self::new(store)
            .with_request_timeout(config.request_timeout())
            .with_channel_capacity(config.channel_capacity)
    }

    /// 设置单次请求超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// 设置快照通道容量
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// 解析 `target_path`（服务目录，以 `/` 结尾）下的成员
    ///
    /// 首次读取失败直接返回错误。`watch` 为 false 时流在首个快照后结束。
    pub async fn resolve(
        &self,
        target_path: &str,
        watch: bool,
        shutdown: CancellationToken,
    ) -> Result<MembershipStream> {
        let read = tokio::time::timeout(self.request_timeout, self.store.get_prefix(target_path))
            .await
            .map_err(|_| PlatformError::timeout("get", self.request_timeout))??;

        let flat = FlatMembership::from_kvs(target_path, read.kvs);
        let initial = flat.snapshot();
        debug!(target = target_path, instances = initial.len(), revision = read.revision, "Initial membership loaded");

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let token = shutdown.child_token();
        let stream = MembershipStream {
            rx,
            _guard: token.clone().drop_guard(),
        };

        // 新建的通道一定有空位
        let _ = tx.try_send(Ok(initial.clone()));

        if !watch {
            return Ok(stream);
        }

        let store = self.store.clone();
        let target = target_path.to_string();
        let request_timeout = self.request_timeout;
        tokio::spawn(async move {
            let opened = tokio::select! {
                _ = token.cancelled() => return,
                opened = tokio::time::timeout(request_timeout, store.watch_prefix(&target, read.revision + 1)) => {
                    opened.unwrap_or_else(|_| Err(PlatformError::timeout("watch", request_timeout)))
                }
            };

            match opened {
                Ok(events) => watch_loop(target, flat, initial, events, tx, token).await,
                Err(e) => {
                    warn!(target = %target, error = %e, "Failed to open membership watch");
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Ok(stream)
    }
}

async fn watch_loop(
    target: String,
    mut flat: FlatMembership,
    mut last: MembershipSnapshot,
    mut events: WatchStream,
    tx: mpsc::Sender<Result<MembershipSnapshot>>,
    token: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = token.cancelled() => {
                debug!(target = %target, "Membership watch cancelled");
                return;
            }
            batch = events.next() => batch,
        };

        match batch {
            Some(Ok(batch)) => {
                for event in &batch.events {
                    flat.apply(event);
                }

                let snapshot = flat.snapshot();
                if snapshot == last {
                    continue;
                }

                debug!(target = %target, revision = batch.revision, instances = snapshot.len(), "Membership changed");
                last = snapshot.clone();
                if tx.send(Ok(snapshot)).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(target = %target, error = %e, "Membership watch failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => {
                info!(target = %target, "Membership watch closed");
                return;
            }
        }
    }
}
