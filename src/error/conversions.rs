//! 错误类型转换实现

use super::PlatformError;

impl From<etcd_client::Error> for PlatformError {
    fn from(err: etcd_client::Error) -> Self {
        PlatformError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for PlatformError {
    fn from(err: toml::de::Error) -> Self {
        PlatformError::Config(err.to_string())
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        PlatformError::Config(err.to_string())
    }
}
