use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response};

#[derive(thiserror::Error, Debug)]
pub enum NetworkError {
    #[error("no upstream configured for {0}")]
    NoUpstream(String),
    #[error("invalid request url {0}")]
    InvalidUrl(String),
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

pub type NetworkFuture<'a> = BoxFuture<'a, Result<Response<Bytes>, NetworkError>>;

/// 缓存未命中时使用的网络出口
///
/// 请求的 URI 总是绝对地址，实现方负责决定实际发往哪里。
pub trait Network: Send + Sync + 'static {
    fn fetch(&self, request: Request<Bytes>) -> NetworkFuture<'_>;
}
