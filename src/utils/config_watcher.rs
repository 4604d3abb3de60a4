use notify::{EventKind, RecursiveMode, Watcher, event::ModifyKind};
use std::{
    path::{Path, PathBuf},
    sync::mpsc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

use crate::{config::Settings, error::Result};

/// 编辑器保存时往往连续触发多个事件
const DEBOUNCE: Duration = Duration::from_millis(500);

/// 文件被替换或删除后原来的 watch 会失效
fn needs_rewatch(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)))
}

fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

fn rewatch(watcher: &mut impl Watcher, config_path: &Path) {
    if let Err(e) = watcher.unwatch(config_path) {
        debug!("Failed to unwatch config file (ignored): {:?}", e);
    }
    match watcher.watch(config_path, RecursiveMode::NonRecursive) {
        Ok(()) => info!("Re-watching config file: {:?}", config_path),
        Err(e) => error!("Failed to re-watch config file: {:?}", e),
    }
}

/// 启动配置文件监听
///
/// 配置文件变化后重新读取并校验，把结果交给 `callback`。
/// 返回的发送器用于停止监听线程。
pub fn start_config_watcher(
    config_path: impl AsRef<Path>,
    callback: impl Fn(Result<Settings>) + Send + 'static,
) -> Result<mpsc::Sender<()>> {
    let (stop_tx, stop_rx) = mpsc::channel();
    let config_path: PathBuf = config_path.as_ref().to_owned();

    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx)?;
    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    info!("Watching config file: {:?}", config_path);

    std::thread::spawn(move || {
        let mut last_event_time: Option<Instant> = None;

        loop {
            if stop_rx.try_recv().is_ok() {
                info!("Stopping config watcher");
                break;
            }

            match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(Ok(event)) => {
                    if !is_relevant(&event.kind) {
                        continue;
                    }
                    if needs_rewatch(&event.kind) {
                        rewatch(&mut watcher, &config_path);
                    }

                    let now = Instant::now();
                    if last_event_time.is_some_and(|last| now.duration_since(last) <= DEBOUNCE) {
                        continue;
                    }
                    last_event_time = Some(now);

                    info!("Config file event: {:?}", event.kind);
                    let path = config_path.to_string_lossy();
                    callback(Settings::new(&path));
                }
                Ok(Err(e)) => error!("Watch error: {:?}", e),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watcher channel disconnected");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
            }
        }

        if let Err(e) = watcher.unwatch(&config_path) {
            error!("Failed to unwatch config file: {:?}", e);
        }
    });

    Ok(stop_tx)
}
