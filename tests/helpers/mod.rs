//! 测试辅助工具

#![allow(dead_code)]

use waveplus_bridge::models::{Device, Readings, Sample};

/// 测试用设备序列号
pub const OFFICE: &str = "2931234567";
pub const CELLAR: &str = "2931234568";

/// 生成测试设备
pub fn device(serial: &str, nickname: Option<&str>) -> Device {
    Device::new(serial, nickname.map(str::to_string))
}

/// 生成读数
pub fn readings(pairs: &[(&str, f64)]) -> Readings {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// 生成采样
pub fn sample(serial: &str, timestamp: i64, pairs: &[(&str, f64)]) -> Sample {
    Sample::new(serial, timestamp, readings(pairs))
}

/// 生成一串等间隔的采样
pub fn series(serial: &str, start: i64, step: i64, count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            let ts = start + step * i as i64;
            sample(serial, ts, &[("co2", 400.0 + i as f64), ("temperature", 21.5)])
        })
        .collect()
}

/// 断言结果是成功的
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// 断言结果是错误的
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(val) => panic!("Expected Err, got Ok: {:?}", val),
            Err(e) => e,
        }
    };
}
