//! 设备会话服务
//!
//! 负责把稳定的设备序列号解析为临时蓝牙地址、在不稳定的链路上有限次重试、
//! 以及解码传感器数据帧。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ble::{
    decode_control_payload, decode_sensor_payload, parse_manufacturer_serial, BleAdapter,
    BleConnection, CONTROL_CHARACTERISTIC, CONTROL_COMMAND, SENSOR_CHARACTERISTIC,
};
use crate::errors::DeviceError;
use crate::models::{Device, Readings, Sample};
use crate::utils::now_ts;

/// 连续连接失败达到该次数后丢弃缓存地址
const CONNECT_FAILURES_BEFORE_REDISCOVERY: u32 = 2;

/// 等待控制应答的时长
const CONTROL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 额外重试次数，总尝试次数为 `retries + 1`
    pub retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self { retries, retry_delay }
    }

    pub fn total_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// 设备会话服务
pub struct DeviceService {
    adapter: Arc<dyn BleAdapter>,
    scan_timeout: Duration,
    /// 扫描中见过的 序列号 → 地址
    discovered: Mutex<HashMap<String, String>>,
}

impl DeviceService {
    pub fn new(adapter: Arc<dyn BleAdapter>, scan_timeout: Duration) -> Self {
        Self {
            adapter,
            scan_timeout,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// 读取一台设备，失败时按策略重试
    ///
    /// 成功后更新设备的地址与最新采样；全部失败时设备状态保持不变。
    pub async fn read(&self, device: &mut Device, policy: RetryPolicy) -> Result<Sample, DeviceError> {
        let total = policy.total_attempts();
        let mut connect_failures = 0;
        let mut last_error = None;

        for attempt in 1..=total {
            match self.try_read(device).await {
                Ok((address, sample)) => {
                    tracing::debug!(
                        serial = %device.serial,
                        attempt = attempt,
                        readings = sample.readings.len(),
                        "设备读取成功"
                    );
                    device.record_success(&address, sample.clone());
                    return Ok(sample);
                }
                Err(e) => {
                    if e.is_connect_failure() {
                        connect_failures += 1;
                        if connect_failures >= CONNECT_FAILURES_BEFORE_REDISCOVERY {
                            self.forget(device);
                            connect_failures = 0;
                        }
                    } else {
                        connect_failures = 0;
                    }

                    tracing::warn!(
                        serial = %device.serial,
                        attempt = attempt,
                        total = total,
                        error = %e,
                        "设备读取失败"
                    );
                    last_error = Some(e);

                    if attempt < total {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        Err(DeviceError::ReadFailure {
            serial: device.serial.clone(),
            attempts: total,
            last: Box::new(last_error.unwrap_or(DeviceError::NotDiscovered {
                serial: device.serial.clone(),
            })),
        })
    }

    /// 单次尝试：解析地址、连接、读取、断开、解码
    async fn try_read(&self, device: &Device) -> Result<(String, Sample), DeviceError> {
        let address = self.resolve(device).await?;

        let mut conn = self.adapter.connect(&address).await?;
        let raw = conn.read_characteristic(SENSOR_CHARACTERISTIC).await;
        let control = match raw {
            Ok(_) => read_control(conn.as_mut(), &device.serial).await,
            Err(_) => None,
        };
        if let Err(e) = conn.disconnect().await {
            tracing::debug!(serial = %device.serial, error = %e, "断开连接失败");
        }

        let mut readings = decode_sensor_payload(&raw?)?;
        if let Some(control) = control {
            readings.extend(control);
        }
        Ok((address, Sample::new(device.serial.clone(), now_ts(), readings)))
    }

    /// 解析设备地址：设备缓存 → 扫描缓存 → 重新扫描
    async fn resolve(&self, device: &Device) -> Result<String, DeviceError> {
        if let Some(address) = &device.link_address {
            return Ok(address.clone());
        }
        if let Some(address) = self.cached_address(&device.serial) {
            return Ok(address);
        }

        let advertisements = self.adapter.scan(self.scan_timeout).await?;
        let mut found = Vec::new();
        for ad in &advertisements {
            let Some(serial) = ad.manufacturer_data.as_deref().and_then(parse_manufacturer_serial) else {
                continue;
            };
            found.push((serial, ad.address.clone()));
        }

        tracing::debug!(
            serial = %device.serial,
            advertisements = advertisements.len(),
            waveplus = found.len(),
            "蓝牙扫描完成"
        );

        let mut discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
        for (serial, address) in found {
            discovered.entry(serial).or_insert(address);
        }
        discovered
            .get(&device.serial)
            .cloned()
            .ok_or_else(|| DeviceError::NotDiscovered {
                serial: device.serial.clone(),
            })
    }

    fn cached_address(&self, serial: &str) -> Option<String> {
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(serial)
            .cloned()
    }

    /// 丢弃设备的缓存地址，下次读取时重新扫描
    fn forget(&self, device: &mut Device) {
        tracing::info!(serial = %device.serial, "连续连接失败，丢弃缓存地址");
        device.link_address = None;
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&device.serial);
    }
}

/// 读取电池与环境光；失败不影响本次采样
async fn read_control(conn: &mut dyn BleConnection, serial: &str) -> Option<Readings> {
    let result = match conn
        .request(CONTROL_CHARACTERISTIC, &[CONTROL_COMMAND], CONTROL_RESPONSE_TIMEOUT)
        .await
    {
        Ok(raw) => decode_control_payload(&raw),
        Err(e) => Err(e),
    };
    match result {
        Ok(readings) => Some(readings),
        Err(e) => {
            tracing::warn!(serial = %serial, error = %e, "控制数据读取失败，仅记录传感器数据");
            None
        }
    }
}
