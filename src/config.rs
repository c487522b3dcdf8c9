use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PlatformError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub registrar: RegistrarConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EtcdConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// 服务端注册配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrarConfig {
    /// 租约 TTL（秒）
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: u64,
    /// 单次存储请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// 失败后重试前的等待（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 停止时是否主动撤销租约，默认等待 TTL 自然过期
    #[serde(default)]
    pub revoke_on_shutdown: bool,
}

/// 客户端发现与负载均衡配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// 同时接收流量的实例上限，0 表示不限制
    #[serde(default)]
    pub max_active_servers: usize,
    /// 单次存储请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// 等待首个成员快照的超时（秒）
    #[serde(default = "default_request_timeout")]
    pub lookup_timeout: u64,
    /// 建立单个连接的超时（秒）
    #[serde(default = "default_request_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// 成员快照通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 连接存活探测间隔（毫秒）
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_prefix() -> String {
    "rpcplatform".to_string()
}

fn default_lease_ttl() -> u64 {
    4
}

fn default_request_timeout() -> u64 {
    4
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_reconnect_base_delay_ms() -> u64 {
    100
}

fn default_reconnect_max_delay_ms() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    16
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            prefix: default_prefix(),
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            lease_ttl: default_lease_ttl(),
            request_timeout: default_request_timeout(),
            retry_delay_ms: default_retry_delay_ms(),
            revoke_on_shutdown: false,
        }
    }
}

impl RegistrarConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_active_servers: 0,
            request_timeout: default_request_timeout(),
            lookup_timeout: default_request_timeout(),
            connect_timeout: default_request_timeout(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            channel_capacity: default_channel_capacity(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

impl PlatformConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PlatformConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖配置
    ///
    /// - `ETCD_ENDPOINTS`: 逗号分隔的 etcd 地址
    /// - `ETCD_PREFIX`: 键前缀
    /// - `ETCD_TTL_SECONDS`: 注册租约 TTL
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            self.etcd.endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(prefix) = std::env::var("ETCD_PREFIX") {
            self.etcd.prefix = prefix;
        }

        if let Ok(ttl) = std::env::var("ETCD_TTL_SECONDS") {
            self.registrar.lease_ttl = ttl
                .parse()
                .map_err(|e| PlatformError::Config(format!("ETCD_TTL_SECONDS={ttl}: {e}")))?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.etcd.endpoints.is_empty() {
            return Err(PlatformError::Config("etcd endpoints not configured".to_string()));
        }
        if self.registrar.lease_ttl == 0 {
            return Err(PlatformError::Config("registrar.lease_ttl must be positive".to_string()));
        }
        if self.client.channel_capacity == 0 {
            return Err(PlatformError::Config("client.channel_capacity must be positive".to_string()));
        }
        Ok(())
    }
}
