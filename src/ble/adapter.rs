//! 蓝牙适配器抽象

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::DeviceError;

/// 一条广播记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// 设备蓝牙地址
    pub address: String,
    /// 厂商数据（AD 类型 0xFF），含前 2 字节厂商 ID
    pub manufacturer_data: Option<Vec<u8>>,
}

/// 蓝牙适配器
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// 扫描一轮广播
    async fn scan(&self, timeout: Duration) -> Result<Vec<Advertisement>, DeviceError>;

    /// 按地址建立连接
    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, DeviceError>;
}

/// 已建立的蓝牙连接
#[async_trait]
pub trait BleConnection: Send {
    /// 读取特征值
    async fn read_characteristic(&mut self, uuid: Uuid) -> Result<Vec<u8>, DeviceError>;

    /// 开启指示后写入命令，收集设备返回的数据直到静默
    ///
    /// `timeout` 为等待首个应答的时长；不支持命令交互的连接返回 `Read` 错误。
    async fn request(
        &mut self,
        uuid: Uuid,
        command: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        let _ = (command, timeout);
        Err(DeviceError::Read(format!("不支持的命令特征值: {}", uuid)))
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}
