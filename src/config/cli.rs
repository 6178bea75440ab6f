//! 命令行参数

use clap::Parser;
use std::path::PathBuf;

/// Wave Plus 蓝牙桥接服务
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "waveplus-bridge", version, about)]
pub struct Cli {
    /// 设备序列号（10 位），可附带昵称，例如 "2931234567, cellar"
    pub devices: Vec<String>,

    /// YAML 配置文件
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// HTTP 服务端口
    #[arg(long)]
    pub port: Option<u16>,

    /// 采样数据日志（CSV）
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// 运行日志文件，不指定时输出到标准输出
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// 采样周期（秒）
    #[arg(long)]
    pub period: Option<u32>,

    /// 使用模拟设备代替蓝牙硬件
    #[arg(long)]
    pub emulation: bool,
}
