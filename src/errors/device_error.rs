//! 设备会话错误

/// 蓝牙设备读取过程中的错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("扫描未发现设备: {serial}")]
    NotDiscovered { serial: String },

    #[error("蓝牙扫描失败: {0}")]
    Scan(String),

    #[error("连接设备失败: {0}")]
    Connect(String),

    #[error("读取特征值失败: {0}")]
    Read(String),

    #[error("传感器数据解码失败: {0}")]
    Decode(String),

    #[error("设备 {serial} 读取失败（共尝试 {attempts} 次）: {last}")]
    ReadFailure {
        serial: String,
        attempts: u32,
        last: Box<DeviceError>,
    },
}

impl DeviceError {
    /// 是否为连接阶段的失败（用于判断缓存地址是否失效）
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, DeviceError::Connect(_))
    }
}
