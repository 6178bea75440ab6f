//! 数据验证工具

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::AppError;
use crate::models::{is_known_sensor, Device};

/// 设备条目：序列号后可跟昵称，以空白、逗号、冒号或分号分隔
static DEVICE_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\w*)[\s,:;]*(.*?)\s*$").unwrap_or_else(|e| panic!("设备条目正则无效: {}", e))
});

/// 验证序列号（10 位数字）
///
/// 广播中的序列号为 u32，超出该范围的序列号永远无法被发现。
pub fn validate_serial(serial: &str) -> Result<(), AppError> {
    if serial.len() != 10 || !serial.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::ValidationError(format!(
            "序列号必须为 10 位数字: {}",
            serial
        )));
    }
    if serial.parse::<u32>().is_err() {
        return Err(AppError::ValidationError(format!(
            "序列号超出范围（最大 {}）: {}",
            u32::MAX,
            serial
        )));
    }
    Ok(())
}

/// 解析设备条目，例如 `"2931234567, cellar"`
pub fn parse_device_entry(entry: &str) -> Result<Device, AppError> {
    let caps = DEVICE_ENTRY
        .captures(entry)
        .ok_or_else(|| AppError::ValidationError(format!("无法解析设备条目: {}", entry)))?;

    let serial = caps.get(1).map_or("", |m| m.as_str());
    validate_serial(serial)?;

    let nickname = caps
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Device::new(serial, nickname))
}

/// 验证传感器名称
pub fn validate_sensor_name(sensor: &str) -> Result<(), AppError> {
    if !is_known_sensor(sensor) {
        return Err(AppError::ValidationError(format!("未知传感器: {}", sensor)));
    }
    Ok(())
}
