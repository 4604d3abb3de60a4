//! zipemu 库
//! 导出公共 API 和类型，供二进制与集成测试使用

pub mod cli;
pub mod config;
pub mod consts;
pub mod error;
pub mod http;
pub mod middlewares;
pub mod utils;
pub mod worker;
