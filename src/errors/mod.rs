//! 错误类型模块

mod app_error;
mod device_error;

pub use app_error::AppError;
pub use device_error::DeviceError;
