//! 预警通知动作
//!
//! 预警引擎只依赖 [`AlertSink`]：渲染好的消息交给通道后立即返回，
//! 通道自身负责排队、发送与失败处理。

use std::sync::Arc;

use crate::models::AlertEvent;

/// 通知通道
pub trait AlertSink: Send + Sync {
    /// 通道名称（用于日志）
    fn name(&self) -> &str;

    /// 投递渲染后的消息，不阻塞调用方
    fn dispatch(&self, rendered_message: String);
}

/// 预警动作：消息模板 + 通道
#[derive(Clone)]
pub struct AlertAction {
    template: String,
    sink: Arc<dyn AlertSink>,
}

impl AlertAction {
    pub fn new(template: impl Into<String>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            template: template.into(),
            sink,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// 渲染并投递
    pub fn fire(&self, event: &AlertEvent) {
        let message = event.render(&self.template);
        tracing::debug!(sink = %self.sink.name(), alert = %event.alert, "投递预警消息");
        self.sink.dispatch(message);
    }
}

impl std::fmt::Debug for AlertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertAction")
            .field("template", &self.template)
            .field("sink", &self.sink.name())
            .finish()
    }
}

/// 打印通道：写入运行日志
#[derive(Debug, Default)]
pub struct PrintSink;

impl PrintSink {
    pub fn new() -> Self {
        Self
    }
}

impl AlertSink for PrintSink {
    fn name(&self) -> &str {
        "print"
    }

    fn dispatch(&self, rendered_message: String) {
        tracing::info!(target: "waveplus_bridge::alert", "{}", rendered_message);
    }
}
