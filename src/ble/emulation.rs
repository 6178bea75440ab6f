//! 模拟蓝牙适配器
//!
//! 无蓝牙硬件时使用：每个配置的序列号对应一台虚拟设备，按随机游走生成读数，
//! 并编码成与真实设备相同的数据帧，解码链路与真机一致。

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::adapter::{Advertisement, BleAdapter, BleConnection};
use super::payload::{
    encode_control_payload, encode_manufacturer_data, CONTROL_CHARACTERISTIC, CONTROL_COMMAND,
    SENSOR_CHARACTERISTIC, SENSOR_PAYLOAD_VERSION,
};
use crate::errors::DeviceError;

/// 单个模拟传感器（随机游走）
#[derive(Debug, Clone)]
struct EmulatedSensor {
    min: f64,
    max: f64,
    value: f64,
}

impl EmulatedSensor {
    fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            value: (min + max) / 2.0,
        }
    }

    fn next<R: Rng>(&mut self, rng: &mut R) -> f64 {
        let up = rng.gen::<f64>() * (self.max - self.value) / 20.0;
        let down = rng.gen::<f64>() * (self.value - self.min) / 20.0;
        let value = ((self.value + up - down) * 10.0).round() / 10.0;
        self.value = value.clamp(self.min, self.max);
        self.value
    }
}

/// 单台模拟设备
#[derive(Debug, Clone)]
struct EmulatedDevice {
    humidity: EmulatedSensor,
    radon_st: EmulatedSensor,
    radon_lt: EmulatedSensor,
    temperature: EmulatedSensor,
    pressure: EmulatedSensor,
    co2: EmulatedSensor,
    voc: EmulatedSensor,
    illuminance: EmulatedSensor,
    /// 电池电压（mV）
    battery_mv: EmulatedSensor,
}

impl EmulatedDevice {
    fn new() -> Self {
        Self {
            humidity: EmulatedSensor::new(20.0, 100.0),
            radon_st: EmulatedSensor::new(20.0, 500.0),
            radon_lt: EmulatedSensor::new(20.0, 500.0),
            temperature: EmulatedSensor::new(10.0, 35.0),
            pressure: EmulatedSensor::new(950.0, 1050.0),
            co2: EmulatedSensor::new(400.0, 1500.0),
            voc: EmulatedSensor::new(20.0, 1000.0),
            illuminance: EmulatedSensor::new(0.0, 255.0),
            battery_mv: EmulatedSensor::new(2400.0, 3200.0),
        }
    }

    /// 生成下一帧数据
    fn next_frame(&mut self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let humidity = (self.humidity.next(&mut rng) * 2.0).round() as u8;
        let fields = [
            self.radon_st.next(&mut rng).round() as u16,
            self.radon_lt.next(&mut rng).round() as u16,
            (self.temperature.next(&mut rng) * 100.0).round() as u16,
            (self.pressure.next(&mut rng) * 50.0).round() as u16,
            self.co2.next(&mut rng).round() as u16,
            self.voc.next(&mut rng).round() as u16,
            0,
            0,
        ];

        let mut raw = vec![SENSOR_PAYLOAD_VERSION, humidity, 0, 0];
        for field in fields {
            raw.extend_from_slice(&field.to_le_bytes());
        }
        raw
    }

    /// 生成下一条控制应答
    fn next_control(&mut self) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let illuminance = self.illuminance.next(&mut rng).round() as u8;
        let battery_mv = self.battery_mv.next(&mut rng).round() as u16;
        encode_control_payload(illuminance, battery_mv)
    }
}

type DeviceTable = Arc<Mutex<HashMap<String, EmulatedDevice>>>;

/// 模拟适配器
pub struct EmulatedAdapter {
    /// 地址 → 序列号
    advertised: Vec<(String, u32)>,
    devices: DeviceTable,
}

impl EmulatedAdapter {
    pub fn new<S: AsRef<str>>(serials: &[S]) -> Self {
        let mut advertised = Vec::new();
        let mut devices = HashMap::new();

        for serial in serials {
            let Ok(number) = serial.as_ref().parse::<u32>() else {
                tracing::warn!(serial = %serial.as_ref(), "模拟设备序列号超出范围，已忽略");
                continue;
            };
            let address = emulated_address(number);
            devices.insert(address.clone(), EmulatedDevice::new());
            advertised.push((address, number));
        }

        Self {
            advertised,
            devices: Arc::new(Mutex::new(devices)),
        }
    }
}

/// 由序列号派生固定的模拟地址
fn emulated_address(serial: u32) -> String {
    let b = serial.to_be_bytes();
    format!("E0:57:{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3])
}

#[async_trait]
impl BleAdapter for EmulatedAdapter {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<Advertisement>, DeviceError> {
        Ok(self
            .advertised
            .iter()
            .map(|(address, serial)| Advertisement {
                address: address.clone(),
                manufacturer_data: Some(encode_manufacturer_data(*serial)),
            })
            .collect())
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn BleConnection>, DeviceError> {
        let known = self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address);
        if !known {
            return Err(DeviceError::Connect(format!("模拟设备不存在: {}", address)));
        }

        Ok(Box::new(EmulatedConnection {
            address: address.to_string(),
            devices: self.devices.clone(),
        }))
    }
}

/// 模拟连接
struct EmulatedConnection {
    address: String,
    devices: DeviceTable,
}

impl EmulatedConnection {
    fn with_device<T>(&self, f: impl FnOnce(&mut EmulatedDevice) -> T) -> Result<T, DeviceError> {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .get_mut(&self.address)
            .map(f)
            .ok_or_else(|| DeviceError::Read(format!("模拟设备已移除: {}", self.address)))
    }
}

#[async_trait]
impl BleConnection for EmulatedConnection {
    async fn read_characteristic(&mut self, uuid: Uuid) -> Result<Vec<u8>, DeviceError> {
        if uuid != SENSOR_CHARACTERISTIC {
            return Err(DeviceError::Read(format!("不支持的特征值: {}", uuid)));
        }
        self.with_device(EmulatedDevice::next_frame)
    }

    async fn request(
        &mut self,
        uuid: Uuid,
        command: &[u8],
        _timeout: Duration,
    ) -> Result<Vec<u8>, DeviceError> {
        if uuid != CONTROL_CHARACTERISTIC {
            return Err(DeviceError::Read(format!("不支持的命令特征值: {}", uuid)));
        }
        if command != [CONTROL_COMMAND].as_slice() {
            return Err(DeviceError::Read(format!("未知命令: {:02x?}", command)));
        }
        self.with_device(EmulatedDevice::next_control)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
