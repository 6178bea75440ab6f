//! 统一错误类型定义

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use super::DeviceError;

/// 应用错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // 资源不存在 (404)
    #[error("资源不存在: {0}")]
    NotFound(String),

    // 请求或配置校验错误 (400)
    #[error("参数无效: {0}")]
    ValidationError(String),

    // 持久化日志读写错误 (500)
    #[error("存储错误: {0}")]
    StorageError(#[from] std::io::Error),

    // CSV 编解码错误 (500)
    #[error("CSV 处理错误: {0}")]
    CsvError(#[from] csv::Error),

    // 设备通信错误 (503)
    #[error(transparent)]
    DeviceError(#[from] DeviceError),

    // 通知通道错误
    #[error("通知发送错误: {0}")]
    NotifyError(String),

    // 内部错误 (500)
    #[error("内部服务错误: {0}")]
    InternalError(String),

    // 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),
}

/// API 错误响应结构
#[derive(Serialize)]
struct ErrorResponse {
    code: u16,
    message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::DeviceError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StorageError(_)
            | AppError::CsvError(_)
            | AppError::NotifyError(_)
            | AppError::InternalError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        // 内部错误不暴露细节
        let message = match self {
            AppError::NotFound(msg) | AppError::ValidationError(msg) => msg.clone(),
            AppError::DeviceError(_) => "设备暂时不可用".to_string(),
            _ => "服务内部错误".to_string(),
        };

        tracing::error!(
            error = %self,
            status = %status,
            "请求处理错误"
        );

        HttpResponse::build(status).json(ErrorResponse {
            code: status.as_u16(),
            message,
        })
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
