//! 单元测试入口

#[path = "../helpers/mod.rs"]
mod helpers;
#[path = "../mocks/mod.rs"]
mod mocks;

mod alert_tests;
mod config_tests;
mod payload_tests;
mod store_tests;
