//! gRPC 错误处理
//!
//! 提供 PlatformError 到 tonic::Status 的转换

use super::{ErrorCode, PlatformError};
use crate::balancer::PickError;
use tonic::{Code, Status};

impl From<PlatformError> for Status {
    fn from(err: PlatformError) -> Self {
        let code = err.code();
        let mut status = Status::new(map_error_code_to_grpc(code), err.to_string());

        // 添加错误代码到 metadata
        if let Ok(value) = code.as_u32().to_string().parse() {
            status.metadata_mut().insert("error-code", value);
        }

        status
    }
}

impl From<PickError> for Status {
    fn from(err: PickError) -> Self {
        PlatformError::from(err).into()
    }
}

/// 将错误代码映射到 gRPC 状态码
fn map_error_code_to_grpc(code: ErrorCode) -> Code {
    match code {
        ErrorCode::InvalidParameter => Code::InvalidArgument,

        ErrorCode::ConnectionFailed
        | ErrorCode::ConnectionClosed
        | ErrorCode::StoreUnavailable
        | ErrorCode::LeaseNotFound
        | ErrorCode::PublishConflict
        | ErrorCode::WatchCanceled
        | ErrorCode::LookupClosed
        | ErrorCode::NoSubchannelAvailable
        | ErrorCode::NoServerAvailable => Code::Unavailable,

        ErrorCode::ConnectionTimeout | ErrorCode::StoreTimeout => Code::DeadlineExceeded,

        ErrorCode::ConfigurationError => Code::Internal,

        ErrorCode::UnknownError => Code::Unknown,
    }
}
