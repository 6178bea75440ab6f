//! 通用数据结构

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Readings;

/// 设备最新数据快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSnapshot {
    pub serial: String,
    /// 展示名（昵称或序列号）
    pub name: String,
    pub readings: Readings,
    /// 最近更新时间（Unix 秒），从未读取成功时为空
    pub update_time: Option<i64>,
}

/// `/data` 接口中的单个设备条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceDataEntry {
    #[serde(flatten)]
    pub readings: Readings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<i64>,
}

/// `/data` 接口响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataResponse {
    pub current_time: i64,
    pub devices: BTreeMap<String, DeviceDataEntry>,
}

impl DataResponse {
    pub fn from_snapshots(current_time: i64, snapshots: Vec<DeviceSnapshot>) -> Self {
        let devices = snapshots
            .into_iter()
            .map(|s| {
                (
                    s.name,
                    DeviceDataEntry {
                        readings: s.readings,
                        update_time: s.update_time,
                    },
                )
            })
            .collect();
        Self {
            current_time,
            devices,
        }
    }
}

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub devices: usize,
    pub records: usize,
    pub uptime_seconds: u64,
}
