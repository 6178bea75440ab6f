//! 采样数据模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wave Plus 上报的全部传感器名称，顺序即日志列顺序
///
/// 最后两项来自控制特征值，设备不应答时缺省。
pub const SENSOR_NAMES: [&str; 9] = [
    "humidity",
    "radon_st",
    "radon_lt",
    "temperature",
    "pressure",
    "co2",
    "voc",
    "illuminance",
    "battery",
];

/// 传感器名 → 数值
pub type Readings = BTreeMap<String, f64>;

/// 单次采样
///
/// 传感器上报"不可用"时，对应键不出现在 `readings` 中。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// 设备序列号
    pub device_id: String,
    /// Unix 秒
    pub timestamp: i64,
    pub readings: Readings,
}

impl Sample {
    pub fn new(device_id: impl Into<String>, timestamp: i64, readings: Readings) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            readings,
        }
    }

    pub fn get(&self, sensor: &str) -> Option<f64> {
        self.readings.get(sensor).copied()
    }
}

/// 判断是否为已知传感器
pub fn is_known_sensor(name: &str) -> bool {
    SENSOR_NAMES.contains(&name)
}
