//! 时间处理工具

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::AppError;

/// 当前 Unix 秒
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// 解析时间跨度，支持 `时:分:秒` 或秒数，返回秒
pub fn parse_time_span(s: &str) -> Result<i64, AppError> {
    let s = s.trim();
    let invalid = || AppError::ValidationError(format!("时间跨度格式错误: {}", s));

    if s.contains(':') {
        let parts = s
            .split(':')
            .map(|p| p.trim().parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        return match parts.as_slice() {
            [h, m, sec] if *m < 60 && *sec < 60 => {
                Ok(*h as i64 * 3600 + *m as i64 * 60 + *sec as i64)
            }
            _ => Err(invalid()),
        };
    }

    match s.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs.round() as i64),
        _ => Err(invalid()),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimeSpan {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

/// serde 辅助：反序列化时间跨度
pub fn deserialize_time_span<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimeSpan::deserialize(deserializer)? {
        RawTimeSpan::Seconds(secs) if secs >= 0 => Ok(secs),
        RawTimeSpan::Seconds(secs) => Err(serde::de::Error::custom(format!(
            "时间跨度不能为负: {}",
            secs
        ))),
        RawTimeSpan::Fractional(secs) => {
            parse_time_span(&secs.to_string()).map_err(serde::de::Error::custom)
        }
        RawTimeSpan::Text(text) => parse_time_span(&text).map_err(serde::de::Error::custom),
    }
}

/// CSV 导出使用的本地时间格式
pub fn format_csv_time(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y/%m/%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

/// 格式化为 ISO 8601
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
