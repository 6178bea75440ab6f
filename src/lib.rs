//! Waveplus Bridge - Airthings Wave Plus 蓝牙桥接服务
//!
//! 周期性读取 Wave Plus 空气质量传感器，支持：
//! - 带保留时长与抽稀策略的时序存储
//! - 追加式 CSV 日志与启动恢复
//! - 分级阈值预警（邮件 / 日志）
//! - HTTP JSON / CSV 查询与 MQTT 发布

pub mod ble;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

pub use errors::{AppError, DeviceError};
