//! Mock 对象

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use waveplus_bridge::ble::{
    encode_manufacturer_data, Advertisement, BleAdapter, BleConnection, CONTROL_CHARACTERISTIC,
    SENSOR_CHARACTERISTIC, SENSOR_PAYLOAD_VERSION,
};
use waveplus_bridge::DeviceError;

/// 构造传感器数据帧
///
/// 字段依次为 radon_st、radon_lt、temperature×100、pressure×50、co2、voc。
pub fn sensor_frame(humidity_x2: u8, fields: [u16; 6]) -> Vec<u8> {
    let mut raw = vec![SENSOR_PAYLOAD_VERSION, humidity_x2, 0, 0];
    for field in fields.iter().chain([0u16, 0u16].iter()) {
        raw.extend_from_slice(&field.to_le_bytes());
    }
    raw
}

/// 一帧常规读数
pub fn default_frame() -> Vec<u8> {
    sensor_frame(91, [120, 98, 2137, 50060, 650, 80])
}

/// 可控失败次数的蓝牙适配器 Mock
///
/// 前 `fail_first` 次连接返回 Connect 错误，之后返回固定数据帧。
#[derive(Clone)]
pub struct FlakyAdapter {
    serial: u32,
    address: String,
    frame: Vec<u8>,
    control: Option<Vec<u8>>,
    fail_first: usize,
    connects: Arc<Mutex<usize>>,
    scans: Arc<Mutex<usize>>,
}

impl FlakyAdapter {
    pub fn new(serial: &str, fail_first: usize) -> Self {
        Self {
            serial: serial.parse().unwrap(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            frame: default_frame(),
            control: None,
            fail_first,
            connects: Arc::new(Mutex::new(0)),
            scans: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_frame(mut self, frame: Vec<u8>) -> Self {
        self.frame = frame;
        self
    }

    /// 设置控制特征值的应答，未设置时连接不支持命令交互
    pub fn with_control(mut self, control: Vec<u8>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn connect_attempts(&self) -> usize {
        *self.connects.lock().unwrap()
    }

    pub fn scan_count(&self) -> usize {
        *self.scans.lock().unwrap()
    }
}

#[async_trait]
impl BleAdapter for FlakyAdapter {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<Advertisement>, DeviceError> {
        *self.scans.lock().unwrap() += 1;
        Ok(vec![
            Advertisement {
                address: "11:22:33:44:55:66".to_string(),
                manufacturer_data: None,
            },
            Advertisement {
                address: self.address.clone(),
                manufacturer_data: Some(encode_manufacturer_data(self.serial)),
            },
        ])
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, DeviceError> {
        let attempt = {
            let mut connects = self.connects.lock().unwrap();
            *connects += 1;
            *connects
        };
        if attempt <= self.fail_first {
            return Err(DeviceError::Connect(format!("连接超时: {}", address)));
        }
        Ok(Box::new(FixedConnection {
            frame: self.frame.clone(),
            control: self.control.clone(),
        }))
    }
}

struct FixedConnection {
    frame: Vec<u8>,
    control: Option<Vec<u8>>,
}

#[async_trait]
impl BleConnection for FixedConnection {
    async fn read_characteristic(&mut self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        if uuid != SENSOR_CHARACTERISTIC {
            return Err(DeviceError::Read(format!("不支持的特征值: {}", uuid)));
        }
        Ok(self.frame.clone())
    }

    async fn request(
        &mut self,
        uuid: Uuid,
        _command: &[u8],
        _timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        match &self.control {
            Some(control) if uuid == CONTROL_CHARACTERISTIC => Ok(control.clone()),
            _ => Err(DeviceError::Read(format!("不支持的命令特征值: {}", uuid))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
