//! 邮件通知服务
//!
//! 每个邮件动作对应一个后台任务，消息经无界队列按先进先出发送，
//! 发送失败只记录日志。

use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

use crate::config::{MailActionSettings, SmtpSecurity, SmtpSettings};
use crate::errors::AppError;
use crate::services::AlertSink;

/// 根据 SMTP 配置构建传输
pub fn build_transport(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, AppError> {
    let builder = match settings.security {
        // 隐式 TLS
        SmtpSecurity::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.server)
            .map_err(|e| AppError::ConfigError(format!("SMTP 配置错误: {}", e)))?,
        // STARTTLS
        SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.server)
            .map_err(|e| AppError::ConfigError(format!("SMTP 配置错误: {}", e)))?,
        SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.server),
    };

    let builder = builder.port(settings.port);
    let builder = match &settings.user {
        Some(user) => {
            let password = settings
                .password
                .as_ref()
                .map(|p| p.expose_secret().clone())
                .unwrap_or_default();
            builder.credentials(Credentials::new(user.clone(), password))
        }
        None => builder,
    };

    Ok(builder.build())
}

/// 邮件通道
pub struct MailSink {
    name: String,
    tx: mpsc::UnboundedSender<String>,
}

impl MailSink {
    /// 创建通道并启动发送任务，需在 tokio 运行时内调用
    pub fn spawn(smtp: &SmtpSettings, action: &MailActionSettings) -> Result<Self, AppError> {
        let from: Mailbox = action
            .from
            .parse()
            .map_err(|e| AppError::ConfigError(format!("发件人地址无效 '{}': {}", action.from, e)))?;
        let to = action
            .to
            .to_vec()
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| AppError::ConfigError(format!("收件人地址无效 '{}': {}", addr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(AppError::ConfigError("邮件动作未配置收件人".to_string()));
        }

        let mailer = build_transport(smtp)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let name = format!("mail:{}", action.to.to_vec().join(","));

        tokio::spawn(run_mail_worker(mailer, from, to, action.subject.clone(), rx));
        tracing::info!(sink = %name, server = %smtp.server, "邮件通道已启动");

        Ok(Self { name, tx })
    }
}

impl AlertSink for MailSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, rendered_message: String) {
        if self.tx.send(rendered_message).is_err() {
            tracing::error!(sink = %self.name, "邮件发送任务已退出，消息丢弃");
        }
    }
}

fn build_message(
    from: &Mailbox,
    to: &[Mailbox],
    subject: &str,
    body: String,
) -> Result<Message, AppError> {
    let mut builder = Message::builder().from(from.clone()).subject(subject);
    for recipient in to {
        builder = builder.to(recipient.clone());
    }
    builder
        .body(body)
        .map_err(|e| AppError::NotifyError(format!("邮件构建失败: {}", e)))
}

async fn run_mail_worker(
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(body) = rx.recv().await {
        let message = match build_message(&from, &to, &subject, body) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "预警邮件构建失败");
                continue;
            }
        };

        match mailer.send(message).await {
            Ok(_) => tracing::info!(recipients = to.len(), "预警邮件已发送"),
            Err(e) => tracing::error!(error = %e, "预警邮件发送失败"),
        }
    }
    tracing::debug!("邮件发送任务结束");
}
