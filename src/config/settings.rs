//! 应用配置加载和管理

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use validator::Validate;

use super::Cli;
use crate::errors::AppError;
use crate::models::{
    AlertSource, DecimationPolicy, DecimationStep, Device, Direction, PublishRule, Trigger,
};
use crate::utils::{deserialize_time_span, parse_device_entry, validate_sensor_name};

/// 应用配置结构
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// 设备条目，格式为 "序列号[, 昵称]"
    #[serde(default)]
    pub devices: Vec<String>,
    /// 采样周期（秒）
    #[serde(default = "default_period")]
    #[validate(range(min = 1, max = 86400, message = "采样周期应在 1-86400 秒之间"))]
    pub period: u64,
    /// 单次读取失败后的重试次数
    #[serde(default = "default_retries")]
    #[validate(range(max = 100, message = "重试次数不能超过 100"))]
    pub retries: u32,
    /// 重试间隔（秒）
    #[serde(default = "default_retry_delay", deserialize_with = "deserialize_time_span")]
    pub retry_delay: i64,
    /// 内存数据保留时长（秒）
    #[serde(default = "default_retention", deserialize_with = "deserialize_time_span")]
    #[validate(range(min = 1, message = "数据保留时长必须大于 0"))]
    pub data_retention: i64,
    /// 使用模拟设备
    #[serde(default)]
    pub emulation: bool,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    /// 图表数据抽稀区段
    #[serde(default)]
    pub graph_decimations: Vec<DecimationSettings>,
    #[serde(default)]
    pub alerts: Vec<AlertSettings>,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    #[serde(default)]
    pub mqtt: Option<MqttSettings>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_period() -> u64 { 120 }
fn default_retries() -> u32 { 3 }
fn default_retry_delay() -> i64 { 1 }
fn default_retention() -> i64 { 31 * 24 * 3600 }

/// 蓝牙扫描配置
#[derive(Debug, Clone, Deserialize)]
pub struct BleSettings {
    /// 单轮扫描时长（毫秒）
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self { scan_timeout_ms: default_scan_timeout() }
    }
}

fn default_scan_timeout() -> u64 { 100 }

/// HTTP 服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// 工作线程数，0 表示按 CPU 核数
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_http_port(),
            workers: default_workers(),
        }
    }
}

fn default_true() -> bool { true }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_http_port() -> u16 { 8080 }
fn default_workers() -> usize { 2 }

/// 持久化日志配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    /// CSV 日志路径，不配置时仅保存在内存
    #[serde(default)]
    pub csv: Option<PathBuf>,
}

/// 抽稀区段配置
#[derive(Debug, Clone, Deserialize)]
pub struct DecimationSettings {
    #[serde(deserialize_with = "deserialize_time_span")]
    pub age: i64,
    pub factor: usize,
}

/// 单个或多个值
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// 预警配置
#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    #[serde(default)]
    pub name: Option<String>,
    /// 数据源，格式为 "设备:传感器"
    pub sources: OneOrMany<String>,
    pub trigger: TriggerSettings,
    pub actions: OneOrMany<ActionSettings>,
}

/// 触发条件配置
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSettings {
    #[serde(default)]
    pub above: Option<OneOrMany<f64>>,
    #[serde(default)]
    pub below: Option<OneOrMany<f64>>,
    #[serde(rename = "for", default, deserialize_with = "deserialize_time_span")]
    pub for_secs: i64,
    #[serde(default, deserialize_with = "deserialize_time_span")]
    pub min_interval: i64,
}

/// 预警动作配置，`mail` 与 `print` 至少一个
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSettings {
    #[serde(default)]
    pub mail: Option<MailActionSettings>,
    #[serde(default)]
    pub print: Option<PrintActionSettings>,
}

/// 邮件动作
#[derive(Debug, Clone, Deserialize)]
pub struct MailActionSettings {
    pub from: String,
    pub to: OneOrMany<String>,
    #[serde(default = "default_mail_subject")]
    pub subject: String,
    #[serde(default = "default_mail_message")]
    pub message: String,
}

fn default_mail_subject() -> String { "Sensor alert".to_string() }
fn default_mail_message() -> String { "Sensor: %d.%s, Level: %v".to_string() }

/// 打印动作
#[derive(Debug, Clone, Deserialize)]
pub struct PrintActionSettings {
    #[serde(default = "default_print_message")]
    pub message: String,
}

impl Default for PrintActionSettings {
    fn default() -> Self {
        Self { message: default_print_message() }
    }
}

fn default_print_message() -> String { "Sensor alert: Sensor: %d.%s, Level: %v".to_string() }

/// SMTP 加密方式
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// 隐式 TLS（通常端口 465）
    Ssl,
    /// STARTTLS（通常端口 587）
    #[default]
    Tls,
    None,
}

/// SMTP 邮件服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
}

fn default_smtp_port() -> u16 { 587 }

/// MQTT 认证
#[derive(Debug, Clone, Deserialize)]
pub struct MqttAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
}

/// MQTT 发布配置
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub auth: Option<MqttAuth>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// 主题根，为空时直接使用设备名作为一级主题
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub publish: Vec<PublishRule>,
}

fn default_mqtt_port() -> u16 { 1883 }
fn default_client_id() -> String { "waveplus-bridge".to_string() }
fn default_keep_alive() -> u64 { 30 }

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// text 或 json
    #[serde(default = "default_log_format")]
    pub format: String,
    /// 日志文件，不配置时输出到标准输出
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Settings {
    /// 从配置文件、环境变量和命令行参数加载配置
    ///
    /// 优先级：命令行 > 环境变量 > 配置文件 > 默认值。
    pub fn load(cli: &Cli) -> Result<Self, AppError> {
        let builder = match &cli.config {
            Some(path) => Config::builder().add_source(File::from(path.as_path()).required(true)),
            None => Config::builder().add_source(File::with_name("config/default").required(false)),
        };
        Self::build(builder, cli)
    }

    /// 从 YAML 文本加载（不读取环境变量）
    pub fn from_yaml(yaml: &str) -> Result<Self, AppError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    fn build(builder: ConfigBuilder<DefaultState>, cli: &Cli) -> Result<Self, AppError> {
        let mut builder = builder
            // 环境变量覆盖，前缀 WAVEPLUS，分隔符 __
            .add_source(
                Environment::with_prefix("WAVEPLUS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_override_option("http.port", cli.port.map(i64::from))?
            .set_override_option("period", cli.period.map(i64::from))?
            .set_override_option("storage.csv", cli.csv.as_ref().map(|p| p.display().to_string()))?
            .set_override_option("logging.file", cli.log.as_ref().map(|p| p.display().to_string()))?;

        if !cli.devices.is_empty() {
            builder = builder.set_override("devices", cli.devices.clone())?;
        }
        if cli.emulation {
            builder = builder.set_override("emulation", true)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check()?;
        Ok(settings)
    }

    /// 启动时的一次性完整校验
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;

        if self.retry_delay < 0 {
            return Err(AppError::ValidationError("重试间隔不能为负".to_string()));
        }

        let devices = self.parsed_devices()?;
        if devices.is_empty() {
            return Err(AppError::ConfigError("未配置任何设备序列号".to_string()));
        }

        self.decimation_policy()?;

        for (idx, alert) in self.alerts.iter().enumerate() {
            let name = alert.display_name(idx);
            alert.trigger.to_trigger().map_err(|e| {
                AppError::ConfigError(format!("预警 '{}' 触发条件无效: {}", name, e))
            })?;
            for source in alert.parsed_sources()? {
                validate_sensor_name(&source.sensor)?;
                if !devices.iter().any(|d| d.is_named(&source.device)) {
                    return Err(AppError::ConfigError(format!(
                        "预警 '{}' 引用了未配置的设备: {}",
                        name, source.device
                    )));
                }
            }
            let actions = alert.actions.to_vec();
            if actions.is_empty() {
                return Err(AppError::ConfigError(format!("预警 '{}' 未配置动作", name)));
            }
            for action in &actions {
                if action.mail.is_none() && action.print.is_none() {
                    return Err(AppError::ConfigError(format!(
                        "预警 '{}' 的动作必须为 mail 或 print",
                        name
                    )));
                }
                if action.mail.is_some() && self.smtp.is_none() {
                    return Err(AppError::ConfigError(format!(
                        "预警 '{}' 使用邮件动作但未配置 smtp",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// 解析设备列表，拒绝重复序列号
    pub fn parsed_devices(&self) -> Result<Vec<Device>, AppError> {
        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(self.devices.len());
        for entry in &self.devices {
            let device = parse_device_entry(entry)?;
            if !seen.insert(device.serial.clone()) {
                return Err(AppError::ConfigError(format!("重复的设备序列号: {}", device.serial)));
            }
            devices.push(device);
        }
        Ok(devices)
    }

    pub fn decimation_policy(&self) -> Result<DecimationPolicy, AppError> {
        DecimationPolicy::new(
            self.graph_decimations
                .iter()
                .map(|d| DecimationStep { age: d.age, factor: d.factor })
                .collect(),
        )
    }

    /// HTTP 监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

impl AlertSettings {
    /// 预警名称，未配置时按序号生成
    pub fn display_name(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("alert-{}", index + 1))
    }

    pub fn parsed_sources(&self) -> Result<Vec<AlertSource>, AppError> {
        self.sources.to_vec().iter().map(|s| s.parse()).collect()
    }
}

impl TriggerSettings {
    /// 转换为触发条件，`above` 与 `below` 必须且只能配置一个
    pub fn to_trigger(&self) -> Result<Trigger, AppError> {
        let (direction, thresholds) = match (&self.above, &self.below) {
            (Some(above), None) => (Direction::Above, above.to_vec()),
            (None, Some(below)) => (Direction::Below, below.to_vec()),
            (Some(_), Some(_)) => {
                return Err(AppError::ValidationError(
                    "above 与 below 不能同时配置，请拆分为两个预警".to_string(),
                ))
            }
            (None, None) => {
                return Err(AppError::ValidationError("必须配置 above 或 below".to_string()))
            }
        };
        Trigger::new(direction, thresholds, self.for_secs, self.min_interval)
    }
}
