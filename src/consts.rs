use std::env;

use const_format::concatcp;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMPILER: &str = env!("EMU_COMPILER");
pub const OS: &str = env::consts::OS;
pub const ARCH: &str = env::consts::ARCH;

/// 访问上游时使用的 User-Agent
pub const USER_AGENT: &str = concatcp!(NAME, "/", VERSION);

// config defaults
pub const LOG_LEVEL: &str = "info";
pub fn log_level() -> String {
    LOG_LEVEL.to_string()
}

pub const LOG_FOLDER: &str = "./logs";
pub fn log_folder() -> String {
    LOG_FOLDER.to_string()
}

pub const CACHE_NAME: &str = "zip-emulation-cache";
pub fn cache_name() -> String {
    CACHE_NAME.to_string()
}

pub const CONTROL_PATH: &str = "/__emulation";
pub fn control_path() -> String {
    CONTROL_PATH.to_string()
}

pub const TIMEOUT_DEFAULT: u16 = 75;
pub fn timeout_default() -> u16 {
    TIMEOUT_DEFAULT
}

pub const PROXY_TIMEOUT: u16 = 30;
pub fn proxy_timeout() -> u16 {
    PROXY_TIMEOUT
}

pub fn system_proxy() -> bool {
    true
}

/// 导入请求体默认上限 256MB
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;
pub fn max_body_size() -> usize {
    MAX_BODY_SIZE
}
