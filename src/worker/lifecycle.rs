//! worker 生命周期
//!
//! 安装时删除旧缓存，激活后立即接管所有已打开的页面。

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info};

use super::{Worker, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// 安装失败或已终止
    Redundant,
}

impl WorkerState {
    fn can_transition(self, to: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, to),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activated)
                | (_, Redundant)
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    state: RwLock<WorkerState>,
}

impl Lifecycle {
    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// 切换到新状态，非法的切换保持原状态并返回错误
    pub fn transition(&self, to: WorkerState) -> Result<WorkerState, WorkerError> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition(to) {
            return Err(WorkerError::InvalidState { from, to });
        }
        *state = to;
        Ok(from)
    }
}

/// 处理 install 事件：无条件删除同名缓存
pub fn install(worker: &Worker) -> Result<(), WorkerError> {
    worker.lifecycle.transition(WorkerState::Installing)?;
    info!(
        "Installing worker for {}, deleting old cache {}",
        worker.origin(),
        worker.cache_name()
    );

    if let Err(err) = worker.storage().delete(worker.cache_name()) {
        error!("Failed to delete cache {}: {}", worker.cache_name(), err);
        worker.lifecycle.transition(WorkerState::Redundant)?;
        return Err(err.into());
    }

    worker.lifecycle.transition(WorkerState::Installed)?;
    Ok(())
}

/// 处理 activate 事件，返回被接管的页面数量
pub fn activate(worker: &Worker) -> Result<usize, WorkerError> {
    worker.lifecycle.transition(WorkerState::Activating)?;
    info!("Activating worker for {}", worker.origin());
    worker.lifecycle.transition(WorkerState::Activated)?;

    let claimed = worker.clients().claim();
    info!("Worker claimed {} open clients", claimed);
    Ok(claimed)
}

/// 终止 worker 并关闭缓存存储
pub fn terminate(worker: &Worker) {
    if let Ok(from) = worker.lifecycle.transition(WorkerState::Redundant)
        && from != WorkerState::Redundant
    {
        info!("Worker for {} terminated", worker.origin());
    }
    worker.storage().close();
}
