//! 预警引擎
//!
//! 引擎独立于存储，逐条消费新采样；状态按 `(预警规则, 数据源)` 懒创建，
//! 生命周期与进程相同。

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Settings;
use crate::errors::AppError;
use crate::models::{AlertEvent, AlertSource, AlertState, Device, Sample, Trigger};
use crate::services::{AlertAction, AlertSink, MailSink, PrintSink};

/// 一条预警规则
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub sources: Vec<AlertSource>,
    pub trigger: Trigger,
    pub actions: Vec<AlertAction>,
}

/// 预警状态视图（诊断用）
#[derive(Debug, Clone, PartialEq)]
pub struct AlertStateView {
    pub alert: String,
    pub source: AlertSource,
    pub state: AlertState,
}

/// 预警引擎
#[derive(Debug, Default)]
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    states: HashMap<(usize, AlertSource), AlertState>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    /// 按配置构建引擎与通知通道
    ///
    /// 邮件通道会启动后台任务，需在 tokio 运行时内调用。
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let print_sink: Arc<dyn AlertSink> = Arc::new(PrintSink::new());
        let mut rules = Vec::with_capacity(settings.alerts.len());

        for (idx, alert) in settings.alerts.iter().enumerate() {
            let mut actions = Vec::new();
            for action in alert.actions.to_vec() {
                if let Some(mail) = &action.mail {
                    let smtp = settings.smtp.as_ref().ok_or_else(|| {
                        AppError::ConfigError("邮件动作需要 smtp 配置".to_string())
                    })?;
                    let sink: Arc<dyn AlertSink> = Arc::new(MailSink::spawn(smtp, mail)?);
                    actions.push(AlertAction::new(mail.message.clone(), sink));
                }
                if let Some(print) = &action.print {
                    actions.push(AlertAction::new(print.message.clone(), print_sink.clone()));
                }
            }

            rules.push(AlertRule {
                name: alert.display_name(idx),
                sources: alert.parsed_sources()?,
                trigger: alert.trigger.to_trigger()?,
                actions,
            });
        }

        tracing::info!(alerts = rules.len(), "预警规则加载完成");
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// 评估单个数据源的一次读数，需要发出预警时返回事件
    pub fn evaluate(
        &mut self,
        alert: usize,
        source: &AlertSource,
        value: f64,
        now: i64,
    ) -> Option<AlertEvent> {
        let rule = self.rules.get(alert)?;
        let state = self.states.entry((alert, source.clone())).or_default();
        let previous = *state;
        let severity = state.step(&rule.trigger, value, now)?;

        tracing::debug!(
            alert = %rule.name,
            source = %source,
            from = ?previous,
            to = ?state,
            "预警状态变化"
        );

        Some(AlertEvent {
            id: Uuid::new_v4(),
            alert: rule.name.clone(),
            source: source.clone(),
            device_name: source.device.clone(),
            severity,
            level: rule.trigger.threshold_for(severity),
            value,
            fired_at: Utc::now(),
        })
    }

    /// 处理一条新采样：评估所有引用该设备的数据源并投递预警
    pub fn process_sample(&mut self, device: &Device, sample: &Sample) -> Vec<AlertEvent> {
        let mut fired = Vec::new();

        for alert in 0..self.rules.len() {
            let sources: Vec<AlertSource> = self.rules[alert]
                .sources
                .iter()
                .filter(|s| device.is_named(&s.device))
                .cloned()
                .collect();

            for source in sources {
                let Some(value) = sample.get(&source.sensor) else {
                    tracing::debug!(
                        alert = %self.rules[alert].name,
                        source = %source,
                        "采样中缺少该传感器，跳过评估"
                    );
                    continue;
                };

                if let Some(mut event) = self.evaluate(alert, &source, value, sample.timestamp) {
                    event.device_name = device.display_name().to_string();
                    tracing::info!(
                        alert = %event.alert,
                        source = %event.source,
                        level = event.level,
                        value = event.value,
                        "触发预警"
                    );
                    for action in &self.rules[alert].actions {
                        action.fire(&event);
                    }
                    fired.push(event);
                }
            }
        }

        fired
    }

    /// 当前状态，未评估过的数据源为 Idle
    pub fn state(&self, alert: usize, source: &AlertSource) -> AlertState {
        self.states
            .get(&(alert, source.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// 全部已创建的状态
    pub fn states(&self) -> Vec<AlertStateView> {
        let mut views: Vec<AlertStateView> = self
            .states
            .iter()
            .filter_map(|((alert, source), state)| {
                self.rules.get(*alert).map(|rule| AlertStateView {
                    alert: rule.name.clone(),
                    source: source.clone(),
                    state: *state,
                })
            })
            .collect();
        views.sort_by(|a, b| a.alert.cmp(&b.alert).then_with(|| a.source.cmp(&b.source)));
        views
    }
}
