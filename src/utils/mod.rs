use std::sync::mpsc;

use tracing::{debug, error, info};

use crate::config::Settings;
use crate::consts::{ARCH, COMPILER, NAME, OS, VERSION};
use crate::http::{ServerHandles, shutdown_servers};

pub mod config_watcher;
pub mod logging;

pub use config_watcher::*;
pub use logging::*;

/// 打印启动信息
pub fn print_banner(settings: &Settings) {
    info!("{}/{}", NAME, VERSION);
    info!("{}", COMPILER);
    info!("OS: {} {}", OS, ARCH);
    debug!("settings {:?}", settings);
    for host in &settings.host {
        info!(
            "Host {}:{} caches into {:?}, control path {}",
            host.ip, host.port, host.cache_name, host.control_path
        );
    }
}

/// 优雅关闭服务器和配置监听器
pub async fn shutdown_application(handles: ServerHandles, stop_tx: mpsc::Sender<()>) {
    info!("Received shutdown signal, closing servers...");

    let mut current_handles = handles.lock().await;
    shutdown_servers(&mut current_handles).await;

    if let Err(err) = stop_tx.send(()) {
        error!("Failed to send stop signal to config watcher: {:?}", err);
    }

    info!("Application shutdown complete");
}
