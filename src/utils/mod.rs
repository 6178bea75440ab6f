//! 工具函数模块

mod pattern;
mod time;
mod validators;

pub use pattern::*;
pub use time::*;
pub use validators::*;
