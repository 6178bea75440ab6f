//! 预警模型
//!
//! 每个 `(预警规则, 数据源)` 对应一个独立的 [`AlertState`] 状态机：
//!
//! ```text
//! Idle ──越限──► Pending ──持续 ≥ for──► Active ──┐
//!  ▲               │                      │ ▲     │ 同级且 ≥ min_interval 重发
//!  └────回落───────┴──────────回落────────┘ └─────┘ 升级立即重发
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;

/// 越限方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

/// 预警数据源（设备:传感器）
///
/// 设备可以写序列号或昵称。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertSource {
    pub device: String,
    pub sensor: String,
}

impl AlertSource {
    pub fn new(device: impl Into<String>, sensor: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            sensor: sensor.into(),
        }
    }
}

impl FromStr for AlertSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((device, sensor)) if !device.trim().is_empty() && !sensor.trim().is_empty() => {
                Ok(Self::new(device.trim(), sensor.trim()))
            }
            _ => Err(AppError::ValidationError(format!(
                "预警数据源格式应为 设备:传感器，实际为 '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.sensor)
    }
}

/// 触发条件
///
/// `thresholds` 始终升序。严重等级按离正常值的距离递增：
/// `above` 时阈值越大越严重，`below` 时阈值越小越严重。
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Trigger {
    pub direction: Direction,
    thresholds: Vec<f64>,
    /// 首次触发前需要持续越限的秒数
    pub for_secs: i64,
    /// 同级重复触发的最小间隔（秒）
    pub min_interval_secs: i64,
}

impl Trigger {
    pub fn new(
        direction: Direction,
        mut thresholds: Vec<f64>,
        for_secs: i64,
        min_interval_secs: i64,
    ) -> Result<Self, AppError> {
        if thresholds.is_empty() {
            return Err(AppError::ValidationError("预警阈值不能为空".to_string()));
        }
        if thresholds.iter().any(|t| !t.is_finite()) {
            return Err(AppError::ValidationError("预警阈值必须为有限数值".to_string()));
        }
        if for_secs < 0 || min_interval_secs < 0 {
            return Err(AppError::ValidationError("预警时间间隔不能为负".to_string()));
        }

        thresholds.sort_by(f64::total_cmp);
        thresholds.dedup();

        Ok(Self {
            direction,
            thresholds,
            for_secs,
            min_interval_secs,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// 当前数值越过的最高严重等级（0 为最轻），未越限返回 None
    pub fn crossed_level(&self, value: f64) -> Option<usize> {
        match self.direction {
            // 不超过 value 的最大阈值
            Direction::Above => {
                let idx = self.thresholds.partition_point(|t| *t <= value);
                idx.checked_sub(1)
            }
            // 不小于 value 的最小阈值
            Direction::Below => {
                let idx = self.thresholds.partition_point(|t| *t < value);
                (idx < self.thresholds.len()).then(|| self.thresholds.len() - 1 - idx)
            }
        }
    }

    /// 严重等级对应的阈值
    pub fn threshold_for(&self, level: usize) -> f64 {
        match self.direction {
            Direction::Above => self.thresholds[level],
            Direction::Below => self.thresholds[self.thresholds.len() - 1 - level],
        }
    }
}

/// 单个数据源的预警状态
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Idle,
    Pending { level: usize, since: i64 },
    Active { level: usize, last_fired_at: i64 },
}

impl AlertState {
    /// 推进状态机，需要发出预警时返回触发的严重等级
    pub fn step(&mut self, trigger: &Trigger, value: f64, now: i64) -> Option<usize> {
        let Some(level) = trigger.crossed_level(value) else {
            *self = AlertState::Idle;
            return None;
        };

        match *self {
            AlertState::Idle => {
                *self = AlertState::Pending { level, since: now };
                self.fire_if_settled(trigger, level, now, now)
            }
            AlertState::Pending { since, .. } => {
                // 等级变化不重置计时起点
                *self = AlertState::Pending { level, since };
                self.fire_if_settled(trigger, level, since, now)
            }
            AlertState::Active {
                level: active,
                last_fired_at,
            } => {
                if level > active {
                    *self = AlertState::Active {
                        level,
                        last_fired_at: now,
                    };
                    return Some(level);
                }

                *self = AlertState::Active {
                    level,
                    last_fired_at,
                };
                if now - last_fired_at >= trigger.min_interval_secs {
                    *self = AlertState::Active {
                        level,
                        last_fired_at: now,
                    };
                    Some(level)
                } else {
                    None
                }
            }
        }
    }

    fn fire_if_settled(
        &mut self,
        trigger: &Trigger,
        level: usize,
        since: i64,
        now: i64,
    ) -> Option<usize> {
        if now - since >= trigger.for_secs {
            *self = AlertState::Active {
                level,
                last_fired_at: now,
            };
            Some(level)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AlertState::Active { .. })
    }
}

/// 预警事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub id: Uuid,
    /// 触发的预警规则名
    pub alert: String,
    pub source: AlertSource,
    /// 设备展示名（用于模板中的 %d）
    pub device_name: String,
    /// 严重等级（0 为最轻）
    pub severity: usize,
    /// 越过的阈值
    pub level: f64,
    /// 触发时的测量值
    pub value: f64,
    pub fired_at: DateTime<Utc>,
}

impl AlertEvent {
    /// 渲染消息模板：%v 数值，%d 设备，%s 传感器
    pub fn render(&self, template: &str) -> String {
        template
            .replace("%v", &format_value(self.value))
            .replace("%d", &self.device_name)
            .replace("%s", &self.source.sensor)
    }
}

/// 数值格式化：整数不带小数点
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
