use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::message::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// 与 worker 通信的页面，`post_message` 投递到页面自己的消息通道
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// 页面已关闭时返回 `false`
    pub fn post_message(&self, message: OutboundMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Debug)]
struct ClientRecord {
    controlled: bool,
}

/// 已注册页面的集合
#[derive(Debug, Default)]
pub struct Clients {
    records: RwLock<HashMap<ClientId, ClientRecord>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个页面，返回页面句柄与其消息接收端
    ///
    /// `controlled` 表示 worker 是否已经处于激活状态，激活后打开的页面直接受控。
    pub fn register(&self, controlled: bool) -> (Client, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::next();
        self.records.write().insert(id, ClientRecord { controlled });
        debug!("Registered {} (controlled: {})", id, controlled);
        (Client { id, sender }, receiver)
    }

    pub fn unregister(&self, id: ClientId) -> bool {
        self.records.write().remove(&id).is_some()
    }

    /// 接管所有已打开的页面，返回新接管的数量
    pub fn claim(&self) -> usize {
        let mut claimed = 0;
        for record in self.records.write().values_mut() {
            if !record.controlled {
                record.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    pub fn is_controlled(&self, id: ClientId) -> bool {
        self.records
            .read()
            .get(&id)
            .map(|record| record.controlled)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
