//! 服务注册模块
//!
//! 服务实例以租约绑定的方式发布在 `<prefix>/<service>/<instance_id>` 下，
//! 进程退出或网络分区后随租约过期自动消失。

pub mod registrar;

pub use registrar::Registrar;
