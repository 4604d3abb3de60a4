use std::str::FromStr;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self},
    layer::SubscriberExt,
};

/// 日志文件名前缀，文件按天滚动，如 `zipemu_log.2026-10-19`
pub const LOG_FILE_PREFIX: &str = "zipemu_log";

/// 解析日志级别，无法解析时回退到 info
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::from_str(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化 Logger
///
/// 日志同时输出到控制台和 `log_folder` 下按天分割的文件。
/// 返回的 guard 需要一直持有，丢弃后文件日志不再写入。
pub fn init_logger(log_level: &str, log_folder: &str) -> anyhow::Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(log_folder, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    let stdout_layer = fmt::layer().with_target(false).with_writer(std::io::stdout);

    let collector = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(stdout_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(collector)
        .with_context(|| "to set a global collector")?;
    Ok(guard)
}
