//! Wave Plus 传感器数据帧解码
//!
//! 传感器特征值为 20 字节小端结构 `<BBBBHHHHHHHH>`：
//!
//! | 偏移 | 类型 | 含义 | 换算 |
//! |------|------|------|------|
//! | 0 | u8 | 协议版本（必须为 1） | - |
//! | 1 | u8 | 湿度 | /2 |
//! | 2-3 | u8 | 环境光 / 保留 | 忽略 |
//! | 4 | u16 | 短期氡 | 0..=16383 有效 |
//! | 6 | u16 | 长期氡 | 0..=16383 有效 |
//! | 8 | u16 | 温度 | /100 |
//! | 10 | u16 | 气压 | /50 |
//! | 12 | u16 | CO2 | ×1 |
//! | 14 | u16 | VOC | ×1 |
//! | 16-19 | u16 | 保留 | 忽略 |
//!
//! 控制特征值需先写入命令 `0x6d`，设备以指示（indication）返回 30 字节的
//! `<BBL12B6H>` 结构，其中偏移 7 为环境光、偏移 26 为电池电压（mV）。

use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::DeviceError;
use crate::models::Readings;

/// 传感器数据特征值
pub const SENSOR_CHARACTERISTIC: Uuid = Uuid::from_u128(0xb42e2a68_ade7_11e4_89d3_123b93f75cba);

/// 控制特征值（电池、环境光）
pub const CONTROL_CHARACTERISTIC: Uuid = Uuid::from_u128(0xb42e2d06_ade7_11e4_89d3_123b93f75cba);

/// 读取电池与环境光的控制命令
pub const CONTROL_COMMAND: u8 = 0x6d;

/// 控制应答长度
pub const CONTROL_PAYLOAD_LEN: usize = 30;

const CONTROL_ILLUMINANCE_OFFSET: usize = 7;
const CONTROL_BATTERY_OFFSET: usize = 26;

/// 电池电压区间（V），换算为 0-100%
const VBAT_MIN: f64 = 2.2;
const VBAT_MAX: f64 = 3.2;

/// 数据帧长度
pub const SENSOR_PAYLOAD_LEN: usize = 20;

/// 支持的协议版本
pub const SENSOR_PAYLOAD_VERSION: u8 = 1;

/// Airthings 厂商 ID
pub const AIRTHINGS_COMPANY_ID: u16 = 0x0334;

/// 16 位字段的"不可用"标记
pub const UNAVAILABLE_U16: u16 = 0xFFFF;

/// 8 位字段的"不可用"标记
pub const UNAVAILABLE_U8: u8 = 0xFF;

/// 氡浓度有效上限
pub const RADON_MAX: u16 = 16383;

fn read_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

/// 解码传感器数据帧，不可用字段不出现在结果中
pub fn decode_sensor_payload(raw: &[u8]) -> Result<Readings, DeviceError> {
    if raw.len() < SENSOR_PAYLOAD_LEN {
        return Err(DeviceError::Decode(format!(
            "数据帧长度不足: 期望 {} 字节，实际 {} 字节",
            SENSOR_PAYLOAD_LEN,
            raw.len()
        )));
    }
    if raw[0] != SENSOR_PAYLOAD_VERSION {
        return Err(DeviceError::Decode(format!("不支持的协议版本: {}", raw[0])));
    }

    let mut readings = Readings::new();

    if raw[1] != UNAVAILABLE_U8 {
        readings.insert("humidity".to_string(), raw[1] as f64 / 2.0);
    }

    for (name, offset) in [("radon_st", 4), ("radon_lt", 6)] {
        let value = read_u16(raw, offset);
        if value <= RADON_MAX {
            readings.insert(name.to_string(), value as f64);
        }
    }

    let scaled: [(&str, usize, f64); 4] = [
        ("temperature", 8, 100.0),
        ("pressure", 10, 50.0),
        ("co2", 12, 1.0),
        ("voc", 14, 1.0),
    ];
    for (name, offset, divisor) in scaled {
        let value = read_u16(raw, offset);
        if value != UNAVAILABLE_U16 {
            readings.insert(name.to_string(), value as f64 / divisor);
        }
    }

    Ok(readings)
}

/// 解码控制应答，得到 `illuminance` 与 `battery`（百分比）
pub fn decode_control_payload(raw: &[u8]) -> Result<Readings, DeviceError> {
    if raw.first() != Some(&CONTROL_COMMAND) {
        return Err(DeviceError::Decode(format!(
            "控制应答命令不匹配: 期望 {:#04x}，实际 {:?}",
            CONTROL_COMMAND,
            raw.first()
        )));
    }
    if raw.len() != CONTROL_PAYLOAD_LEN {
        return Err(DeviceError::Decode(format!(
            "控制应答长度错误: 期望 {} 字节，实际 {} 字节",
            CONTROL_PAYLOAD_LEN,
            raw.len()
        )));
    }

    let mut readings = Readings::new();
    readings.insert(
        "illuminance".to_string(),
        raw[CONTROL_ILLUMINANCE_OFFSET] as f64,
    );

    let vbat = read_u16(raw, CONTROL_BATTERY_OFFSET) as f64 / 1000.0;
    let level = ((vbat - VBAT_MIN) / (VBAT_MAX - VBAT_MIN)).clamp(0.0, 1.0);
    readings.insert("battery".to_string(), (level * 100.0).round());

    Ok(readings)
}

/// 编码控制应答（用于模拟设备）
pub fn encode_control_payload(illuminance: u8, battery_mv: u16) -> Vec<u8> {
    let mut raw = vec![0u8; CONTROL_PAYLOAD_LEN];
    raw[0] = CONTROL_COMMAND;
    raw[CONTROL_ILLUMINANCE_OFFSET] = illuminance;
    raw[CONTROL_BATTERY_OFFSET..CONTROL_BATTERY_OFFSET + 2].copy_from_slice(&battery_mv.to_le_bytes());
    raw
}

/// 从广播厂商数据中解析序列号
///
/// 厂商数据为 8 字节小端结构 `<HLBB>`：厂商 ID、序列号、两个保留字节。
pub fn parse_manufacturer_serial(data: &[u8]) -> Option<String> {
    if data.len() != 8 {
        return None;
    }
    let company = u16::from_le_bytes([data[0], data[1]]);
    if company != AIRTHINGS_COMPANY_ID {
        return None;
    }
    let serial = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
    Some(serial.to_string())
}

/// 把按厂商 ID 拆分的厂商数据还原为带 ID 前缀的原始格式
///
/// 同一广播含多个厂商条目时优先取 Airthings 的条目。
pub fn join_manufacturer_data(entries: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, data) = entries
        .get_key_value(&AIRTHINGS_COMPANY_ID)
        .or_else(|| entries.iter().min_by_key(|(company, _)| **company))?;
    let mut raw = company.to_le_bytes().to_vec();
    raw.extend_from_slice(data);
    Some(raw)
}

/// 编码厂商数据（用于模拟广播）
pub fn encode_manufacturer_data(serial: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(8);
    data.extend_from_slice(&AIRTHINGS_COMPANY_ID.to_le_bytes());
    data.extend_from_slice(&serial.to_le_bytes());
    data.extend_from_slice(&[0x09, 0x00]);
    data
}
