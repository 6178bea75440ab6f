//! 采样调度
//!
//! 周期性地依次读取全部设备，结果写入时序存储、交给预警引擎，
//! 周期结束后发布 MQTT。同一时刻只有一个读取在进行。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::models::Device;
use crate::services::{AlertEngine, DeviceService, MqttPublisher, RetryPolicy, SeriesStore};
use crate::utils::now_ts;

/// 单个周期的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub alerts: usize,
}

/// 采样调度器
pub struct Scheduler {
    devices: Vec<Device>,
    device_service: DeviceService,
    store: Arc<SeriesStore>,
    alerts: AlertEngine,
    publisher: Option<MqttPublisher>,
    period: Duration,
    retry: RetryPolicy,
}

impl Scheduler {
    pub fn new(
        devices: Vec<Device>,
        device_service: DeviceService,
        store: Arc<SeriesStore>,
        alerts: AlertEngine,
        period: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            devices,
            device_service,
            store,
            alerts,
            publisher: None,
            period,
            retry,
        }
    }

    pub fn with_publisher(mut self, publisher: MqttPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    /// 执行一个采样周期
    pub async fn run_cycle(&mut self) -> CycleReport {
        let cycle_start = now_ts();
        let mut report = CycleReport::default();

        for device in self.devices.iter_mut() {
            match self.device_service.read(device, self.retry).await {
                Ok(sample) => {
                    report.succeeded += 1;
                    if let Err(e) = self.store.append(sample.clone()) {
                        tracing::error!(serial = %device.serial, error = %e, "采样写入日志失败");
                    }
                    report.alerts += self.alerts.process_sample(device, &sample).len();
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        serial = %device.serial,
                        name = %device.display_name(),
                        error = %e,
                        "设备读取失败，本周期跳过"
                    );
                }
            }
        }

        if let Some(publisher) = &self.publisher {
            publisher.publish(&self.store, cycle_start);
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            alerts = report.alerts,
            "采样周期完成"
        );
        report
    }

    /// 按周期运行，直到收到停止信号
    ///
    /// 周期超时时立即开始下一周期，不会补跑错过的周期。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            devices = self.devices.len(),
            period_secs = self.period.as_secs(),
            "采样调度启动"
        );

        loop {
            let started = Instant::now();

            // 周期内不响应停止信号，读取完成后再退出
            self.run_cycle().await;
            if *shutdown.borrow() {
                break;
            }

            let next = started + self.period;
            if Instant::now() >= next {
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "采样周期超出间隔，立即开始下一周期"
                );
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("采样调度停止");
        if let Some(publisher) = self.publisher.take() {
            publisher.stop().await;
        }
    }
}
