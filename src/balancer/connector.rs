//! 连接建立

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::{PlatformError, Result};

/// 为一个实例地址建立连接
///
/// 负载均衡器为每个实例调用一次 `connect`，并通过 `disconnected` 感知连接失效。
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    /// 建立连接
    async fn connect(&self, address: &str) -> Result<Self::Connection>;

    /// 到 `address` 的连接失效时返回，默认永不返回
    ///
    /// 返回后负载均衡器会把实例标记为 TransientFailure 并重新连接。
    async fn disconnected(&self, _address: &str, _connection: &Self::Connection) {
        futures::future::pending::<()>().await
    }
}

/// 基于 tonic 的 gRPC 连接器
///
/// 实例地址为 `host:port`，连接方式为明文 HTTP/2。
/// `Channel` 断线后会在内部静默重连，所以连接存活由定期的 TCP 探测判断。
#[derive(Debug, Clone)]
pub struct TonicConnector {
    connect_timeout: Duration,
    request_timeout: Option<Duration>,
    health_check_interval: Duration,
}

impl Default for TonicConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(4))
    }
}

impl TonicConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout: None,
            health_check_interval: Duration::from_secs(1),
        }
    }

    /// 设置连接存活探测的间隔
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// 设置每个请求的超时
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn endpoint(&self, address: &str) -> Result<Endpoint> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| PlatformError::connect(address, e))?
            .connect_timeout(self.connect_timeout);
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        Ok(endpoint)
    }
}

#[async_trait]
impl Connector for TonicConnector {
    type Connection = Channel;

    async fn connect(&self, address: &str) -> Result<Channel> {
        let endpoint = self.endpoint(address)?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| PlatformError::connect(address, e))?;
        debug!(address, "gRPC channel connected");
        Ok(channel)
    }

    async fn disconnected(&self, address: &str, _connection: &Channel) {
        let target = dial_target(address);
        let mut interval = tokio::time::interval(self.health_check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        interval.tick().await;

        loop {
            interval.tick().await;
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(address, error = %e, "Health check failed");
                    return;
                }
                Err(_) => {
                    debug!(address, timeout = ?self.connect_timeout, "Health check timed out");
                    return;
                }
            }
        }
    }
}

/// 去掉 scheme 与路径，得到 `host:port`
fn dial_target(address: &str) -> &str {
    let authority = address.split_once("://").map_or(address, |(_, rest)| rest);
    authority.split('/').next().unwrap_or(authority)
}
