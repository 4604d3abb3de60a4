//! 请求拦截
//!
//! 同源请求先查缓存，命中则原样返回，未命中转发到网络；
//! 跨域请求完全不经过缓存。

use bytes::Bytes;
use http::{Method, Request, Response};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    FetchRequest, Worker,
    lifecycle::WorkerState,
    network::NetworkError,
    storage::{BucketState, CacheBucket, CacheError, CacheStorage, StoredResponse},
};

#[derive(Debug)]
pub enum FetchOutcome {
    /// 未拦截，请求原样交还，按正常路径发出
    Passthrough(Request<Bytes>),
    FromCache(Response<Bytes>),
    FromNetwork(Result<Response<Bytes>, NetworkError>),
}

impl FetchOutcome {
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, FetchOutcome::Passthrough(_))
    }
}

#[derive(Debug)]
pub enum Lookup {
    Hit(StoredResponse),
    Miss,
    /// 当前批次仍在写入，条目可能尚未到达
    Pending { generation: u64 },
    /// 查找期间 bucket 被删除或替换
    Stale { generation: u64 },
}

fn request_url<B>(request: &Request<B>) -> Option<Url> {
    Url::parse(&request.uri().to_string()).ok()
}

/// 在当前 bucket 中精确匹配请求
///
/// 缓存中只保存 GET 响应，其它方法（HEAD 除外）一律视为未命中。
pub fn lookup(worker: &Worker, method: &Method, url: &Url) -> Result<Lookup, CacheError> {
    if method != Method::GET && method != Method::HEAD {
        return Ok(Lookup::Miss);
    }

    let bucket = worker.storage().open(worker.cache_name())?;
    Ok(lookup_in(worker.storage(), &bucket, url))
}

/// 在已打开的 bucket 中查找，查找结束时 bucket 必须仍是同名的当前 generation
///
/// 只有 `Ready` 的 bucket 才能命中，写入中的批次一律视为 `Pending`。
fn lookup_in(storage: &CacheStorage, bucket: &CacheBucket, url: &Url) -> Lookup {
    let generation = bucket.generation();
    let hit = bucket.match_url(url.as_str());

    if storage.live_generation(bucket.name()) != Some(generation) {
        return Lookup::Stale { generation };
    }
    match (hit, bucket.state()) {
        (_, BucketState::Filling) => Lookup::Pending { generation },
        (Some(stored), BucketState::Ready) => Lookup::Hit(stored),
        (None, BucketState::Ready) => Lookup::Miss,
    }
}

/// 处理 fetch 事件
pub async fn handle_fetch(worker: &Worker, fetch: FetchRequest) -> FetchOutcome {
    let FetchRequest { request, client } = fetch;

    let Some(url) = request_url(&request) else {
        warn!("Not intercepting request with relative uri {}", request.uri());
        return FetchOutcome::Passthrough(request);
    };
    if url.origin() != worker.origin().origin() {
        return FetchOutcome::Passthrough(request);
    }
    if worker.state() != WorkerState::Activated {
        debug!("Worker is {}, not intercepting {}", worker.state(), url);
        return FetchOutcome::Passthrough(request);
    }
    if let Some(id) = client
        && !worker.clients().is_controlled(id)
    {
        return FetchOutcome::Passthrough(request);
    }

    let path = url.path();
    match lookup(worker, request.method(), &url) {
        Ok(Lookup::Hit(stored)) => {
            info!("Serving from cache: {}", path);
            return FetchOutcome::FromCache(stored.to_response(request.method()));
        }
        Ok(Lookup::Miss) => {
            info!("Passing through to network: {}", path);
        }
        Ok(Lookup::Pending { generation }) => {
            info!(
                "Cache generation {} is still filling, passing {} through to network",
                generation, path
            );
        }
        Ok(Lookup::Stale { generation }) => {
            warn!(
                "Cache generation {} was replaced during lookup, passing {} through to network",
                generation, path
            );
        }
        Err(err) => {
            warn!("Cache lookup failed for {}: {}", path, err);
        }
    }

    let response = worker.network().fetch(request).await;
    if let Err(err) = &response {
        warn!("Network request for {} failed: {}", url, err);
    }
    FetchOutcome::FromNetwork(response)
}
