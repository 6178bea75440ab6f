//! MQTT 发布服务
//!
//! 每个采样周期结束后，把选定设备的最新读数作为保留消息发布到
//! `<topic>/<设备名>/<传感器>`，设备状态发布到 `<topic>/<设备名>/status`。

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS, Transport};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttSettings;
use crate::errors::AppError;
use crate::models::{format_value, DeviceSnapshot, PublishSpec};
use crate::services::SeriesStore;
use crate::utils::now_ts;

const STATUS_ONLINE: &str = "Online";
const STATUS_OFFLINE: &str = "Offline";
const STATUS_LOST: &str = "Connection lost";

/// 事件循环请求队列容量；发布任务在队列满时等待而非丢弃
const REQUEST_CAPACITY: usize = 64;

/// 停止时等待积压消息发出的上限
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// 一条待发布的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl MqttMessage {
    fn retained(topic: String, payload: impl Into<String>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            retain: true,
        }
    }
}

/// 拼接主题，主题根为空时不加前缀
pub fn join_topic(root: &str, suffix: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        suffix.to_string()
    } else {
        format!("{}/{}", root, suffix)
    }
}

/// 根据本周期的设备快照生成消息
///
/// 更新时间早于 `cycle_start` 的设备本周期没有新数据，只发布 Offline 状态。
pub fn build_messages(
    snapshots: &[DeviceSnapshot],
    topic: &str,
    cycle_start: i64,
    now: i64,
) -> Vec<MqttMessage> {
    let mut messages = Vec::new();

    for snap in snapshots {
        let online = snap.update_time.is_some_and(|t| t >= cycle_start);
        let device_topic = join_topic(topic, &snap.name);

        messages.push(MqttMessage::retained(
            format!("{}/status", device_topic),
            if online { STATUS_ONLINE } else { STATUS_OFFLINE },
        ));
        if !online {
            continue;
        }

        for (sensor, value) in &snap.readings {
            messages.push(MqttMessage::retained(
                format!("{}/{}", device_topic, sensor),
                format_value(*value),
            ));
        }
    }

    messages.push(MqttMessage::retained(
        join_topic(topic, "publish_time"),
        now.to_string(),
    ));
    messages
}

/// 消息发送端
#[async_trait]
pub trait MqttTransport: Send + Sync + 'static {
    async fn send(&self, message: MqttMessage) -> Result<(), AppError>;
}

#[async_trait]
impl MqttTransport for AsyncClient {
    async fn send(&self, message: MqttMessage) -> Result<(), AppError> {
        self.publish(message.topic, QoS::AtLeastOnce, message.retain, message.payload)
            .await
            .map_err(|e| AppError::NotifyError(format!("MQTT 发布失败: {}", e)))
    }
}

/// 发布队列
///
/// 调用方入队后立即返回；后台任务按入队顺序逐条发送，发送端阻塞时消息在队列中积压。
pub struct PublishQueue {
    tx: mpsc::UnboundedSender<MqttMessage>,
    worker: JoinHandle<usize>,
}

impl PublishQueue {
    /// 启动发送任务，需在 tokio 运行时内调用
    pub fn start<T: MqttTransport>(transport: T) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_publish_worker(transport, rx));
        Self { tx, worker }
    }

    pub fn enqueue(&self, message: MqttMessage) {
        if let Err(e) = self.tx.send(message) {
            tracing::error!(topic = %e.0.topic, "MQTT 发布任务已退出，消息丢弃");
        }
    }

    /// 关闭队列并等待积压消息发完，返回已发送条数
    pub async fn close(self, timeout: Duration) -> Option<usize> {
        drop(self.tx);
        match tokio::time::timeout(timeout, self.worker).await {
            Ok(Ok(sent)) => Some(sent),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "MQTT 发布任务异常退出");
                None
            }
            Err(_) => None,
        }
    }
}

async fn run_publish_worker<T: MqttTransport>(
    transport: T,
    mut rx: mpsc::UnboundedReceiver<MqttMessage>,
) -> usize {
    let mut sent = 0;
    while let Some(message) = rx.recv().await {
        let topic = message.topic.clone();
        match transport.send(message).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(topic = %topic, error = %e, "MQTT 消息发布失败"),
        }
    }
    tracing::debug!(sent = sent, "MQTT 发布任务结束");
    sent
}

/// MQTT 发布器
pub struct MqttPublisher {
    client: AsyncClient,
    queue: PublishQueue,
    topic: String,
    spec: PublishSpec,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// 建立会话并启动事件循环，需在 tokio 运行时内调用
    pub fn connect(settings: &MqttSettings) -> Result<Self, AppError> {
        if settings.host.trim().is_empty() {
            return Err(AppError::ConfigError("MQTT host 不能为空".to_string()));
        }

        let status_topic = join_topic(&settings.topic, "status");
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        options.set_last_will(LastWill::new(
            status_topic.clone(),
            STATUS_LOST,
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(auth) = &settings.auth {
            let password = auth
                .password
                .as_ref()
                .map(|p| p.expose_secret().clone())
                .unwrap_or_default();
            options.set_credentials(auth.username.clone(), password);
        }
        if settings.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let host = settings.host.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(host = %host, "MQTT 已连接");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::warn!(host = %host, "MQTT 服务端断开连接");
                    }
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                        tracing::debug!("MQTT 会话结束");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // poll 会在下次调用时自动重连
                        tracing::warn!(host = %host, error = %e, "MQTT 连接异常");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let queue = PublishQueue::start(client.clone());
        queue.enqueue(MqttMessage::retained(status_topic, STATUS_ONLINE));

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            topic = %settings.topic,
            rules = settings.publish.len(),
            "MQTT 发布器已启动"
        );

        Ok(Self {
            client,
            queue,
            topic: settings.topic.clone(),
            spec: PublishSpec::new(settings.publish.clone()),
            event_loop: handle,
        })
    }

    /// 发布本周期数据，入队后立即返回
    pub fn publish(&self, store: &SeriesStore, cycle_start: i64) {
        let snapshots = store.publish_snapshot(&self.spec);
        let messages = build_messages(&snapshots, &self.topic, cycle_start, now_ts());
        tracing::debug!(total = messages.len(), "MQTT 消息入队");
        for message in messages {
            self.queue.enqueue(message);
        }
    }

    /// 发布 Offline 状态，等待积压消息发出后断开
    pub async fn stop(self) {
        self.queue.enqueue(MqttMessage::retained(
            join_topic(&self.topic, "status"),
            STATUS_OFFLINE,
        ));
        match self.queue.close(DRAIN_TIMEOUT).await {
            Some(sent) => tracing::debug!(sent = sent, "MQTT 积压消息已发出"),
            None => tracing::warn!("MQTT 积压消息未能在停止前发完"),
        }
        // 服务端不可达时请求队列已满，不能在此等待
        if let Err(e) = self.client.try_disconnect() {
            tracing::warn!(error = %e, "MQTT 断开失败");
        }
        if tokio::time::timeout(Duration::from_secs(5), self.event_loop)
            .await
            .is_err()
        {
            tracing::warn!("MQTT 事件循环未能及时退出");
        }
    }
}
