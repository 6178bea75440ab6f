//! 集成测试入口

#[path = "../helpers/mod.rs"]
mod helpers;
#[path = "../mocks/mod.rs"]
mod mocks;

mod api_tests;
