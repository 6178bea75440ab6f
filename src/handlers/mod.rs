//! HTTP 处理器模块

mod data_handler;
mod health_handler;

pub use data_handler::*;
pub use health_handler::*;
