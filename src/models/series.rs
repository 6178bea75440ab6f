//! 时序查询相关模型

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::Readings;
use crate::utils::glob_to_regex;

/// 抽稀区段：年龄超过 `age` 秒的点按 `factor` 抽稀
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecimationStep {
    pub age: i64,
    pub factor: usize,
}

/// 抽稀策略
///
/// 区段按年龄升序（最新在前）。点的年龄相对查询区间终点计算，
/// 取最后一个被超过的区段的因子；比第一个区段还新的点保持原始分辨率。
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DecimationPolicy {
    steps: Vec<DecimationStep>,
}

impl DecimationPolicy {
    pub fn new(mut steps: Vec<DecimationStep>) -> Result<Self, AppError> {
        if steps.iter().any(|s| s.factor == 0 || s.age < 0) {
            return Err(AppError::ValidationError(
                "抽稀因子必须大于 0，年龄阈值不能为负".to_string(),
            ));
        }
        steps.sort_by_key(|s| s.age);
        Ok(Self { steps })
    }

    /// 不抽稀
    pub fn none() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[DecimationStep] {
        &self.steps
    }

    /// 给定年龄的抽稀因子
    pub fn factor_for_age(&self, age: i64) -> usize {
        self.steps
            .iter()
            .take_while(|s| age > s.age)
            .last()
            .map_or(1, |s| s.factor)
    }
}

/// 闭区间 `[start, end]`（Unix 秒）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// 截止到 `end` 的全部历史
    pub fn until(end: i64) -> Self {
        Self {
            start: i64::MIN,
            end,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// 传感器过滤器，匹配 `设备:传感器` 形式的标签
///
/// 设备部分可以是序列号或昵称。
#[derive(Debug, Clone)]
pub struct SeriesFilter {
    patterns: Vec<Regex>,
}

impl SeriesFilter {
    /// 匹配全部
    pub fn all() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// 由通配符模式构造（`*` 与 `?`）
    pub fn from_globs<S: AsRef<str>>(globs: &[S]) -> Result<Self, AppError> {
        let patterns = globs
            .iter()
            .map(|g| g.as_ref().trim())
            .filter(|g| !g.is_empty())
            .map(|g| {
                Regex::new(&glob_to_regex(g))
                    .map_err(|e| AppError::ValidationError(format!("无效的匹配模式 '{}': {}", g, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// 由正则表达式构造
    pub fn from_regex(pattern: &str) -> Result<Self, AppError> {
        let re = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| AppError::ValidationError(format!("无效的正则表达式: {}", e)))?;
        Ok(Self { patterns: vec![re] })
    }

    pub fn matches(&self, serial: &str, name: &str, sensor: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let by_serial = format!("{}:{}", serial, sensor);
        let by_name = format!("{}:{}", name, sensor);
        self.patterns
            .iter()
            .any(|p| p.is_match(&by_serial) || p.is_match(&by_name))
    }

    /// 仅保留匹配的读数
    pub fn restrict(&self, serial: &str, name: &str, readings: &Readings) -> Readings {
        readings
            .iter()
            .filter(|(sensor, _)| self.matches(serial, name, sensor))
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// 发布规则中的传感器选择
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SensorSelection {
    /// `"*"` 表示全部
    Wildcard(String),
    List(Vec<String>),
}

impl SensorSelection {
    pub fn includes(&self, sensor: &str) -> bool {
        match self {
            SensorSelection::Wildcard(w) => w == "*" || w == sensor,
            SensorSelection::List(list) => list.iter().any(|s| s == "*" || s == sensor),
        }
    }
}

/// 单个设备的发布规则，`device` 为 `*` 时匹配所有设备
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRule {
    pub device: String,
    pub sensors: SensorSelection,
}

/// 发布规则集合
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PublishSpec {
    pub rules: Vec<PublishRule>,
}

impl PublishSpec {
    pub fn new(rules: Vec<PublishRule>) -> Self {
        Self { rules }
    }

    /// 设备对应的传感器选择；精确匹配优先于 `*`
    pub fn selection_for(&self, serial: &str, name: &str) -> Option<&SensorSelection> {
        self.rules
            .iter()
            .find(|r| r.device == serial || r.device == name)
            .or_else(|| self.rules.iter().find(|r| r.device == "*"))
            .map(|r| &r.sensors)
    }
}
