//! 设备数据模型

use serde::{Deserialize, Serialize};

use super::Sample;

/// Wave Plus 设备
///
/// `serial` 与 `nickname` 在配置加载后不再变化；`link_address` 是蓝牙扫描得到的
/// 临时地址，可能随设备重启而轮换。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// 10 位序列号（背板标签）
    pub serial: String,
    /// 可选昵称
    pub nickname: Option<String>,
    /// 已解析的蓝牙地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_address: Option<String>,
    /// 最近一次成功读取的采样
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<Sample>,
    /// 最近一次成功读取的时间（Unix 秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<i64>,
}

impl Device {
    pub fn new(serial: impl Into<String>, nickname: Option<String>) -> Self {
        Self {
            serial: serial.into(),
            nickname,
            link_address: None,
            last_sample: None,
            last_update_time: None,
        }
    }

    /// 展示名称：优先昵称，否则序列号
    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.serial)
    }

    /// 名称是否指向该设备（序列号或昵称）
    pub fn is_named(&self, name: &str) -> bool {
        self.serial == name || self.nickname.as_deref() == Some(name)
    }

    /// 记录一次成功读取
    pub fn record_success(&mut self, address: &str, sample: Sample) {
        self.link_address = Some(address.to_string());
        self.last_update_time = Some(sample.timestamp);
        self.last_sample = Some(sample);
    }

    /// 距离上次成功读取经过的秒数
    pub fn staleness(&self, now: i64) -> Option<i64> {
        self.last_update_time.map(|t| now - t)
    }
}
