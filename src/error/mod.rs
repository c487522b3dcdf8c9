//! 错误处理模块
//!
//! 提供统一的错误类型、错误代码分类以及到 gRPC 状态的转换

pub mod code;
pub mod conversions;
pub mod grpc;
pub mod platform_error;

pub use code::{ErrorCategory, ErrorCode};
pub use platform_error::{PlatformError, Result};
