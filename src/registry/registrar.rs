//! 服务实例注册
//!
//! 每个服务实例持有一个 [`Registrar`]：授予租约、在一个条件事务中写入地址键和属性子键、
//! 持续续约。任何一步失败都会记录日志并在等待后重试，续约流结束（租约丢失、网络中断）
//! 则立即重新注册。循环只会被关闭令牌终止。

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::attributes::Attributes;
use crate::config::RegistrarConfig;
use crate::error::{PlatformError, Result};
use crate::retry::{FixedRetryPolicy, RetryPolicy};
use crate::store::CoordinationStore;

/// 服务实例注册器
pub struct Registrar {
    store: Arc<dyn CoordinationStore>,
    service_path: String,
    instance_id: String,
    address: String,
    attributes: Attributes,
    lease_ttl: i64,
    request_timeout: Duration,
    retry: FixedRetryPolicy,
    revoke_on_shutdown: bool,
}

impl Registrar {
    /// 创建注册器
    ///
    /// `service_path` 为服务目录（如 `/rpcplatform/echo/`），
    /// `address` 为对外公布的地址，不一定是监听地址。
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        service_path: impl Into<String>,
        address: impl Into<String>,
        attributes: Attributes,
        config: &RegistrarConfig,
    ) -> Self {
        let mut service_path = service_path.into();
        if !service_path.ends_with('/') {
            service_path.push('/');
        }

        Self {
            store,
            service_path,
            instance_id: Uuid::new_v4().simple().to_string(),
            address: address.into(),
            attributes,
            lease_ttl: config.lease_ttl as i64,
            request_timeout: config.request_timeout(),
            retry: FixedRetryPolicy::new(config.retry_delay()),
            revoke_on_shutdown: config.revoke_on_shutdown,
        }
    }

    /// 使用指定的实例 ID
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 实例地址键
    pub fn instance_key(&self) -> String {
        format!("{}{}", self.service_path, self.instance_id)
    }

    /// 需要写入的全部键值：地址键在前，属性子键在后
    pub fn records(&self) -> Vec<(String, String)> {
        let key = self.instance_key();
        let pairs = self.attributes.to_pairs();
        let mut records = Vec::with_capacity(pairs.len() + 1);
        records.push((key.clone(), self.address.clone()));
        records.extend(
            pairs
                .into_iter()
                .map(|(attr, value)| (format!("{key}/{attr}"), value)),
        );
        records
    }

    /// 在后台任务中运行注册循环
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// 运行注册循环，直到 `shutdown` 被取消
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            instance_id = %self.instance_id,
            address = %self.address,
            path = %self.service_path,
            "Starting instance registration"
        );

        let mut current_lease = None;
        let mut failures = 0usize;

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.register_once(&mut current_lease) => outcome,
            };

            match outcome {
                Ok(()) => {
                    failures = 0;
                    info!(instance_id = %self.instance_id, "Lease lost, registering again");
                }
                Err(e) => {
                    warn!(instance_id = %self.instance_id, error = %e, "Instance registration failed");
                    if !self.retry.should_retry(failures, &e) {
                        break;
                    }
                    let delay = self.retry.backoff_duration(failures);
                    failures = failures.saturating_add(1);

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if self.revoke_on_shutdown {
            if let Some(lease_id) = current_lease {
                match self.with_timeout("revoke", self.store.revoke(lease_id)).await {
                    Ok(()) => info!(instance_id = %self.instance_id, lease_id, "Lease revoked"),
                    Err(e) => warn!(instance_id = %self.instance_id, lease_id, error = %e, "Failed to revoke lease"),
                }
            }
        }

        info!(instance_id = %self.instance_id, "Instance registration stopped");
    }

    /// 一轮注册：授予租约、发布、续约直到续约流结束
    async fn register_once(&self, current_lease: &mut Option<i64>) -> Result<()> {
        let lease = self.with_timeout("grant", self.store.grant(self.lease_ttl)).await?;
        *current_lease = Some(lease.id);
        debug!(instance_id = %self.instance_id, lease_id = lease.id, ttl = lease.ttl, "Lease granted");

        let key = self.instance_key();
        let published = self
            .with_timeout("txn", self.store.publish(lease.id, &key, self.records()))
            .await?;
        if !published {
            // 新租约上没有任何键，撤销它，不留孤儿租约
            if let Err(e) = self.with_timeout("revoke", self.store.revoke(lease.id)).await {
                debug!(lease_id = lease.id, error = %e, "Failed to revoke unused lease");
            }
            *current_lease = None;
            return Err(PlatformError::PublishConflict(key));
        }
        info!(instance_id = %self.instance_id, lease_id = lease.id, key = %key, "Instance published");

        let mut acks = self
            .with_timeout("keep_alive", self.store.keep_alive(lease.id))
            .await?;

        // 一个 TTL 内没有收到续约应答，租约已经不可信
        let ack_timeout = Duration::from_secs(lease.ttl.max(1) as u64);
        loop {
            match tokio::time::timeout(ack_timeout, acks.next()).await {
                Ok(Some(Ok(ack))) => trace!(lease_id = ack.id, ttl = ack.ttl, "Lease renewed"),
                Ok(Some(Err(e))) => {
                    warn!(lease_id = lease.id, error = %e, "Lease keep-alive interrupted");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(lease_id = lease.id, timeout = ?ack_timeout, "Lease keep-alive stalled");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| PlatformError::timeout(operation, self.request_timeout))?
    }
}
