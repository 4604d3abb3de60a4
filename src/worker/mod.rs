//! 站点模拟 worker
//!
//! worker 独占一个 `CacheStorage`，所有交互都以事件的形式投递：
//!
//! ```text
//! WorkerHandle ──(Envelope)──> Dispatcher::run
//!                                 │  EventKind -> Handler
//!                                 ├── Install  -> lifecycle::install
//!                                 ├── Activate -> lifecycle::activate
//!                                 ├── Message  -> ingest::handle_message
//!                                 └── Fetch    -> intercept::handle_fetch
//! ```
//!
//! 生命周期事件按顺序执行；消息与 fetch 事件各自在独立任务中运行，
//! 调用方通过 oneshot 等待事件完成。

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::Request;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error};
use url::Url;

pub mod clients;
pub mod ingest;
pub mod intercept;
pub mod lifecycle;
pub mod message;
pub mod network;
pub mod storage;

use clients::{ClientId, Clients};
use intercept::FetchOutcome;
use lifecycle::{Lifecycle, WorkerState};
use message::{BatchReport, InboundMessage};
use network::Network;
use storage::{CacheError, CacheLimits, CacheStorage};

pub use clients::Client;

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("invalid worker state transition from {from} to {to}")]
    InvalidState { from: WorkerState, to: WorkerState },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("handler for {0:?} received a different event")]
    UnexpectedEvent(EventKind),
    #[error("worker has terminated")]
    Terminated,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// worker 自身的 origin，只有同源请求会被拦截
    pub origin: Url,
    pub cache_name: String,
    pub limits: CacheLimits,
}

pub struct Worker {
    origin: Url,
    cache_name: String,
    storage: CacheStorage,
    clients: Clients,
    pub(crate) lifecycle: Lifecycle,
    network: Arc<dyn Network>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("origin", &self.origin.as_str())
            .field("cache_name", &self.cache_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    pub fn new(options: WorkerOptions, network: Arc<dyn Network>) -> Self {
        // 只保留 scheme://host:port
        let origin = Url::parse(&options.origin.origin().ascii_serialization())
            .unwrap_or(options.origin);
        Self {
            origin,
            cache_name: options.cache_name,
            storage: CacheStorage::new(options.limits),
            clients: Clients::new(),
            lifecycle: Lifecycle::default(),
            network,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// 新打开的页面：worker 已激活时直接受控
    pub fn open_client(&self) -> (Client, mpsc::UnboundedReceiver<message::OutboundMessage>) {
        self.clients
            .register(self.state() == WorkerState::Activated)
    }
}

/// 一次 fetch 事件：绝对地址的请求与发起请求的页面
#[derive(Debug)]
pub struct FetchRequest {
    pub request: Request<Bytes>,
    pub client: Option<ClientId>,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Message {
        data: InboundMessage,
        source: Option<Client>,
    },
    Fetch(FetchRequest),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Message { .. } => EventKind::Message,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Message,
    Fetch,
}

impl EventKind {
    fn is_lifecycle(self) -> bool {
        matches!(self, EventKind::Install | EventKind::Activate)
    }
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed,
    Activated { claimed: usize },
    /// 非导入消息时为 `None`
    Message(Option<BatchReport>),
    Fetch(FetchOutcome),
}

pub type EventResult = Result<EventOutcome, WorkerError>;

type Handler = fn(Arc<Worker>, WorkerEvent) -> BoxFuture<'static, EventResult>;

fn on_install(worker: Arc<Worker>, _event: WorkerEvent) -> BoxFuture<'static, EventResult> {
    Box::pin(async move {
        lifecycle::install(&worker)?;
        Ok(EventOutcome::Installed)
    })
}

fn on_activate(worker: Arc<Worker>, _event: WorkerEvent) -> BoxFuture<'static, EventResult> {
    Box::pin(async move {
        let claimed = lifecycle::activate(&worker)?;
        Ok(EventOutcome::Activated { claimed })
    })
}

fn on_message(worker: Arc<Worker>, event: WorkerEvent) -> BoxFuture<'static, EventResult> {
    Box::pin(async move {
        let WorkerEvent::Message { data, source } = event else {
            return Err(WorkerError::UnexpectedEvent(EventKind::Message));
        };
        let report = ingest::handle_message(&worker, data, source.as_ref()).await?;
        Ok(EventOutcome::Message(report))
    })
}

fn on_fetch(worker: Arc<Worker>, event: WorkerEvent) -> BoxFuture<'static, EventResult> {
    Box::pin(async move {
        let WorkerEvent::Fetch(fetch) = event else {
            return Err(WorkerError::UnexpectedEvent(EventKind::Fetch));
        };
        Ok(EventOutcome::Fetch(
            intercept::handle_fetch(&worker, fetch).await,
        ))
    })
}

struct Envelope {
    event: WorkerEvent,
    settled: oneshot::Sender<EventResult>,
}

/// 事件分发循环
pub struct Dispatcher {
    worker: Arc<Worker>,
    handlers: HashMap<EventKind, Handler>,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Dispatcher {
    fn handlers() -> HashMap<EventKind, Handler> {
        HashMap::from([
            (EventKind::Install, on_install as Handler),
            (EventKind::Activate, on_activate as Handler),
            (EventKind::Message, on_message as Handler),
            (EventKind::Fetch, on_fetch as Handler),
        ])
    }

    /// 运行直到所有 `WorkerHandle` 被丢弃，退出时终止 worker
    pub async fn run(mut self) {
        while let Some(Envelope { event, settled }) = self.receiver.recv().await {
            let kind = event.kind();
            let Some(handler) = self.handlers.get(&kind).copied() else {
                error!("No handler registered for {:?}", kind);
                continue;
            };
            debug!("Dispatching {:?} event", kind);

            let future = handler(self.worker.clone(), event);
            if kind.is_lifecycle() {
                let _ = settled.send(future.await);
            } else {
                tokio::spawn(async move {
                    let _ = settled.send(future.await);
                });
            }
        }
        lifecycle::terminate(&self.worker);
    }
}

/// 向 worker 投递事件的句柄
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    worker: Arc<Worker>,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.event.kind())
            .finish()
    }
}

impl WorkerHandle {
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    /// 投递事件并等待其完成
    pub async fn dispatch(&self, event: WorkerEvent) -> EventResult {
        let (settled, done) = oneshot::channel();
        self.sender
            .send(Envelope { event, settled })
            .map_err(|_| WorkerError::Terminated)?;
        done.await.map_err(|_| WorkerError::Terminated)?
    }

    pub async fn install(&self) -> Result<(), WorkerError> {
        self.dispatch(WorkerEvent::Install).await.map(|_| ())
    }

    pub async fn activate(&self) -> Result<usize, WorkerError> {
        match self.dispatch(WorkerEvent::Activate).await? {
            EventOutcome::Activated { claimed } => Ok(claimed),
            _ => Err(WorkerError::UnexpectedEvent(EventKind::Activate)),
        }
    }

    pub async fn post_message(
        &self,
        data: InboundMessage,
        source: Option<Client>,
    ) -> Result<Option<BatchReport>, WorkerError> {
        match self.dispatch(WorkerEvent::Message { data, source }).await? {
            EventOutcome::Message(report) => Ok(report),
            _ => Err(WorkerError::UnexpectedEvent(EventKind::Message)),
        }
    }

    pub async fn fetch(&self, fetch: FetchRequest) -> Result<FetchOutcome, WorkerError> {
        match self.dispatch(WorkerEvent::Fetch(fetch)).await? {
            EventOutcome::Fetch(outcome) => Ok(outcome),
            _ => Err(WorkerError::UnexpectedEvent(EventKind::Fetch)),
        }
    }
}

/// 创建 worker 并在后台运行分发循环
pub fn spawn(worker: Worker) -> (WorkerHandle, JoinHandle<()>) {
    let worker = Arc::new(worker);
    let (sender, receiver) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher {
        worker: worker.clone(),
        handlers: Dispatcher::handlers(),
        receiver,
    };
    let task = tokio::spawn(dispatcher.run());
    (WorkerHandle { worker, sender }, task)
}
