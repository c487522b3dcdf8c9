//! etcd 协调存储

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp, WatchOptions, WatchStream as EtcdWatchStream, Watcher,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CoordinationStore, KeepAliveStream, Lease, LeaseAck, PrefixRead, WatchBatch, WatchEvent, WatchStream};
use crate::error::{PlatformError, Result};

/// etcd 协调存储
///
/// `etcd_client::Client` 内部是共享连接，每次请求克隆一份即可
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// 连接 etcd 集群
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(|e| PlatformError::store(format!("Failed to connect to etcd: {}", e)))?;

        Ok(Self { client })
    }

    /// 使用已有的客户端
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// 获取底层客户端
    pub fn client(&self) -> &Client {
        &self.client
    }
}

struct KeepAliveState {
    lease_id: i64,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
    interval: Duration,
    first: bool,
}

struct WatchState {
    // 保持 watcher 存活，直到流被丢弃
    _watcher: Watcher,
    stream: EtcdWatchStream,
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<PrefixRead> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        let kvs = resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).into_owned(),
                    String::from_utf8_lossy(kv.value()).into_owned(),
                )
            })
            .collect();

        Ok(PrefixRead { kvs, revision })
    }

    async fn watch_prefix(&self, prefix: &str, from_revision: i64) -> Result<WatchStream> {
        let mut client = self.client.clone();
        let opts = WatchOptions::new()
            .with_prefix()
            .with_start_revision(from_revision);
        let (watcher, stream) = client.watch(prefix, Some(opts)).await?;

        let state = WatchState {
            _watcher: watcher,
            stream,
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                match state.stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            let reason = resp.cancel_reason().to_string();
                            return Some((Err(PlatformError::WatchCanceled(reason)), None));
                        }

                        // 创建应答和进度通知不带事件
                        if resp.events().is_empty() {
                            continue;
                        }

                        let events = resp
                            .events()
                            .iter()
                            .filter_map(|event| {
                                let kv = event.kv()?;
                                let key = String::from_utf8_lossy(kv.key()).into_owned();
                                Some(match event.event_type() {
                                    EventType::Put => {
                                        WatchEvent::put(key, String::from_utf8_lossy(kv.value()).into_owned())
                                    }
                                    EventType::Delete => WatchEvent::delete(key),
                                })
                            })
                            .collect();
                        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

                        return Some((Ok(WatchBatch { events, revision }), Some(state)));
                    }
                    Ok(None) => return None,
                    Err(e) => return Some((Err(e.into()), None)),
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn grant(&self, ttl: i64) -> Result<Lease> {
        let mut client = self.client.clone();
        let resp = client.lease_grant(ttl, None).await?;
        Ok(Lease {
            id: resp.id(),
            ttl: resp.ttl(),
        })
    }

    async fn keep_alive(&self, lease_id: i64) -> Result<KeepAliveStream> {
        let mut client = self.client.clone();
        let ttl = client
            .lease_time_to_live(lease_id, None)
            .await?
            .ttl();
        if ttl <= 0 {
            return Err(PlatformError::LeaseNotFound(lease_id));
        }

        let (keeper, stream) = client.lease_keep_alive(lease_id).await?;
        let state = KeepAliveState {
            lease_id,
            keeper,
            stream,
            // 每 TTL 的三分之一续约一次
            interval: Duration::from_millis(ttl as u64 * 1000 / 3),
            first: true,
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            if !state.first {
                tokio::time::sleep(state.interval).await;
            }
            state.first = false;

            if let Err(e) = state.keeper.keep_alive().await {
                return Some((Err(e.into()), None));
            }

            match state.stream.message().await {
                Ok(Some(resp)) if resp.ttl() > 0 => {
                    let ack = LeaseAck {
                        id: resp.id(),
                        ttl: resp.ttl(),
                    };
                    Some((Ok(ack), Some(state)))
                }
                Ok(Some(_)) => {
                    debug!(lease_id = state.lease_id, "Lease expired on the server side");
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(lease_id = state.lease_id, error = %e, "Lease keep-alive stream error");
                    Some((Err(e.into()), None))
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn publish(&self, lease_id: i64, guard_key: &str, kvs: Vec<(String, String)>) -> Result<bool> {
        let ops: Vec<TxnOp> = kvs
            .into_iter()
            .map(|(key, value)| TxnOp::put(key, value, Some(PutOptions::new().with_lease(lease_id))))
            .collect();

        let txn = Txn::new()
            .when(vec![Compare::version(guard_key, CompareOp::Equal, 0)])
            .and_then(ops);

        let mut client = self.client.clone();
        let resp = client.txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn revoke(&self, lease_id: i64) -> Result<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease_id).await?;
        Ok(())
    }
}
