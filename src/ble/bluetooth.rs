//! 基于 btleplug 的蓝牙适配器
//!
//! Linux 下经 BlueZ（D-Bus）访问系统蓝牙适配器，需要 `bluetooth` 特性。

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use uuid::Uuid;

use super::adapter::{Advertisement, BleAdapter, BleConnection};
use super::payload::join_manufacturer_data;
use crate::errors::DeviceError;

/// 首个应答之后，静默超过该时长视为应答结束
const NOTIFICATION_QUIET: Duration = Duration::from_millis(500);

/// 系统蓝牙适配器
pub struct BluetoothAdapter {
    central: Adapter,
}

impl BluetoothAdapter {
    /// 使用系统中的第一个蓝牙适配器
    pub async fn first() -> Result<Self, DeviceError> {
        let manager = Manager::new()
            .await
            .map_err(|e| DeviceError::Scan(format!("蓝牙管理器初始化失败: {}", e)))?;
        let central = manager
            .adapters()
            .await
            .map_err(|e| DeviceError::Scan(format!("获取蓝牙适配器失败: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::Scan("系统中没有蓝牙适配器".to_string()))?;

        let info = central.adapter_info().await.unwrap_or_default();
        tracing::info!(adapter = %info, "使用系统蓝牙适配器");

        Ok(Self { central })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, DeviceError> {
        let peripherals = self
            .central
            .peripherals()
            .await
            .map_err(|e| DeviceError::Connect(e.to_string()))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }
}

#[async_trait]
impl BleAdapter for BluetoothAdapter {
    async fn scan(&self, timeout: Duration) -> Result<Vec<Advertisement>, DeviceError> {
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| DeviceError::Scan(e.to_string()))?;
        tokio::time::sleep(timeout).await;
        if let Err(e) = self.central.stop_scan().await {
            tracing::debug!(error = %e, "停止扫描失败");
        }

        let peripherals = self
            .central
            .peripherals()
            .await
            .map_err(|e| DeviceError::Scan(e.to_string()))?;

        let mut advertisements = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(address = %peripheral.address(), error = %e, "读取广播属性失败");
                    continue;
                }
            };

            advertisements.push(Advertisement {
                address: properties.address.to_string(),
                manufacturer_data: join_manufacturer_data(&properties.manufacturer_data),
            });
        }
        Ok(advertisements)
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, DeviceError> {
        let peripheral = self
            .find_peripheral(address)
            .await?
            .ok_or_else(|| DeviceError::Connect(format!("适配器中没有该地址: {}", address)))?;

        peripheral
            .connect()
            .await
            .map_err(|e| DeviceError::Connect(format!("{}: {}", address, e)))?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(DeviceError::Connect(format!("服务发现失败 {}: {}", address, e)));
        }

        Ok(Box::new(BluetoothConnection { peripheral }))
    }
}

/// 已连接的外设
struct BluetoothConnection {
    peripheral: Peripheral,
}

impl BluetoothConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, DeviceError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| DeviceError::Read(format!("设备没有特征值 {}", uuid)))
    }

    /// 订阅后写入命令，拼接所有应答分片
    async fn exchange(
        &self,
        characteristic: &Characteristic,
        command: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| DeviceError::Read(e.to_string()))?;
        self.peripheral
            .write(characteristic, command, WriteType::WithResponse)
            .await
            .map_err(|e| DeviceError::Read(format!("写入命令失败: {}", e)))?;

        let mut data = Vec::new();
        let mut wait = timeout;
        loop {
            match tokio::time::timeout(wait, notifications.next()).await {
                Ok(Some(n)) if n.uuid == characteristic.uuid => {
                    data.extend_from_slice(&n.value);
                    wait = NOTIFICATION_QUIET;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }

        if data.is_empty() {
            return Err(DeviceError::Read(format!(
                "特征值 {} 在 {:?} 内无应答",
                characteristic.uuid, timeout
            )));
        }
        Ok(data)
    }
}

#[async_trait]
impl BleConnection for BluetoothConnection {
    async fn read_characteristic(&mut self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral
            .read(&characteristic)
            .await
            .map_err(|e| DeviceError::Read(e.to_string()))
    }

    async fn request(
        &mut self,
        uuid: Uuid,
        command: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let characteristic = self.characteristic(uuid)?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| DeviceError::Read(format!("开启指示失败: {}", e)))?;

        let result = self.exchange(&characteristic, command, timeout).await;

        if let Err(e) = self.peripheral.unsubscribe(&characteristic).await {
            tracing::debug!(uuid = %uuid, error = %e, "关闭指示失败");
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| DeviceError::Connect(e.to_string()))
    }
}
