//! 蓝牙链路层：适配器抽象、数据帧解码、系统蓝牙与模拟设备

mod adapter;
#[cfg(feature = "bluetooth")]
mod bluetooth;
mod emulation;
mod payload;

pub use adapter::{Advertisement, BleAdapter, BleConnection};
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluetoothAdapter;
pub use emulation::EmulatedAdapter;
pub use payload::*;
