//! 平台入口
//!
//! [`Platform`] 持有规范化后的键前缀、协调存储和配置，
//! 是创建注册器、查询成员和构建负载均衡通道的统一入口。所有方法都可以并发调用。

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use crate::attributes::Attributes;
use crate::balancer::{Balancer, Connector, ResolverTarget, TonicConnector, UpdateArbiter};
use crate::client::BalancedChannel;
use crate::config::PlatformConfig;
use crate::discovery::{MembershipStream, Resolver};
use crate::error::{PlatformError, Result};
use crate::registry::Registrar;
use crate::store::{CoordinationStore, EtcdStore};

/// 规范化键前缀
///
/// 包含 `//` 的前缀非法；非空前缀补齐开头的 `/` 并去掉结尾的 `/`。
/// `""` 与 `"/"` 都规范化为 `""`。
pub fn normalize_prefix(prefix: &str) -> Result<String> {
    if prefix.contains("//") {
        return Err(PlatformError::InvalidPrefix(prefix.to_string()));
    }
    if prefix.is_empty() {
        return Ok(String::new());
    }

    let mut normalized = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    };
    if normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}

/// 校验客户端目标服务名
pub fn validate_target(target: &str) -> Result<()> {
    if is_valid_name(target) {
        Ok(())
    } else {
        Err(PlatformError::InvalidTargetName(target.to_string()))
    }
}

/// 校验服务端名称
pub fn validate_server_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(PlatformError::InvalidServerName(name.to_string()))
    }
}

/// 平台入口
#[derive(Clone)]
pub struct Platform {
    prefix: String,
    store: Arc<dyn CoordinationStore>,
    config: Arc<PlatformConfig>,
}

impl Platform {
    /// 使用默认配置创建
    pub fn new(prefix: &str, store: Arc<dyn CoordinationStore>) -> Result<Self> {
        let mut config = PlatformConfig::default();
        config.etcd.prefix = prefix.to_string();
        Self::with_config(store, config)
    }

    /// 使用指定配置创建，前缀取自 `config.etcd.prefix`
    pub fn with_config(store: Arc<dyn CoordinationStore>, config: PlatformConfig) -> Result<Self> {
        let prefix = normalize_prefix(&config.etcd.prefix)?;
        Ok(Self {
            prefix,
            store,
            config: Arc::new(config),
        })
    }

    /// 连接配置中的 etcd 集群
    pub async fn connect(config: PlatformConfig) -> Result<Self> {
        let store = EtcdStore::connect(&config.etcd.endpoints).await?;
        info!(endpoints = ?config.etcd.endpoints, prefix = %config.etcd.prefix, "Connected to etcd");
        Self::with_config(Arc::new(store), config)
    }

    /// 规范化后的键前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// 服务目录，形如 `<prefix>/<name>/`
    pub fn service_path(&self, name: &str) -> String {
        format!("{}/{}/", self.prefix, name)
    }

    fn resolver(&self) -> Resolver {
        Resolver::from_config(self.store.clone(), &self.config.client)
    }

    /// 查询某个服务的成员
    ///
    /// `watch` 为 true 时流在每次成员变化时产出新快照，否则只产出一个快照。
    pub async fn lookup(&self, target: &str, watch: bool, shutdown: CancellationToken) -> Result<MembershipStream> {
        validate_target(target)?;
        self.resolver()
            .resolve(&self.service_path(target), watch, shutdown)
            .await
    }

    /// 为服务实例创建注册器
    ///
    /// `address` 为客户端连接时使用的公开地址。
    pub fn registrar(&self, name: &str, address: impl Into<String>, attributes: Attributes) -> Result<Registrar> {
        validate_server_name(name)?;
        Ok(Registrar::new(
            self.store.clone(),
            self.service_path(name),
            address,
            attributes,
            &self.config.registrar,
        ))
    }

    /// 创建连接到 `target` 服务的负载均衡通道
    ///
    /// 等待首个成员快照（最多 `client.lookup_timeout`），之后成员变化在后台持续生效。
    pub async fn balanced_channel<K: Connector>(
        &self,
        target: &str,
        connector: K,
    ) -> Result<BalancedChannel<K::Connection>> {
        validate_target(target)?;
        let client = &self.config.client;
        let shutdown = CancellationToken::new();

        let mut memberships = self
            .resolver()
            .resolve(&self.service_path(target), true, shutdown.child_token())
            .await?;

        let first = match tokio::time::timeout(client.lookup_timeout(), memberships.next_snapshot()).await {
            Ok(Some(Ok(snapshot))) => snapshot,
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Err(PlatformError::LookupClosed(target.to_string())),
            Err(_) => return Err(PlatformError::timeout("lookup", client.lookup_timeout())),
        };
        debug!(target, instances = first.len(), "Initial membership resolved");

        let resolver_target = Arc::new(ResolverTarget::new());
        let mut arbiter = UpdateArbiter::new(resolver_target.clone());
        arbiter.submit(first).await;

        let (balancer, pickers) = Balancer::new(target, Arc::new(connector), resolver_target.clone(), client);
        let state = resolver_target.subscribe();
        balancer.spawn(shutdown.clone());

        tokio::spawn(pump_memberships(
            target.to_string(),
            memberships,
            arbiter,
            shutdown.clone(),
        ));

        Ok(BalancedChannel::new(target, pickers, state, shutdown.drop_guard()))
    }

    /// 创建基于 tonic 的负载均衡 gRPC 通道
    pub async fn new_client(&self, target: &str) -> Result<BalancedChannel<Channel>> {
        let client = &self.config.client;
        let connector =
            TonicConnector::new(client.connect_timeout()).with_health_check_interval(client.health_check_interval());
        self.balanced_channel(target, connector).await
    }
}

async fn pump_memberships<C: Send + Sync + 'static>(
    target: String,
    mut memberships: MembershipStream,
    mut arbiter: UpdateArbiter<C>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = memberships.next_snapshot() => next,
        };

        match next {
            Some(Ok(snapshot)) => arbiter.submit(snapshot).await,
            Some(Err(e)) => {
                warn!(target = %target, error = %e, "Membership watch failed, keeping the last known membership");
                break;
            }
            None => break,
        }
    }
    debug!(target = %target, "Membership updates stopped");
}
