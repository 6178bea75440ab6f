//! 数据模型模块

mod alert;
mod common;
mod device;
mod sample;
mod series;

pub use alert::*;
pub use common::*;
pub use device::*;
pub use sample::*;
pub use series::*;
