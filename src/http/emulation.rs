//! 把 HTTP 请求转换成 worker 事件
//!
//! - `POST {control_path}/files` 投递 `CACHE_ZIP_FILES` 消息
//! - `GET {control_path}/status` 查看 worker 与缓存状态
//! - 其余请求作为 fetch 事件交给 worker 拦截

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{Uri, header::HOST},
    response::Response,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::{
    http::error::{RouteError, RouteResult},
    worker::{
        FetchRequest, WorkerHandle,
        intercept::FetchOutcome,
        lifecycle::WorkerState,
        message::{InboundMessage, OutboundMessage},
        storage::BucketState,
    },
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub worker: WorkerHandle,
    /// 构造绝对地址时使用的 scheme
    pub scheme: &'static str,
    pub max_body_size: usize,
}

impl AppState {
    fn is_own_origin(&self, uri: &Uri) -> bool {
        Url::parse(&uri.to_string())
            .is_ok_and(|url| url.origin() == self.worker.worker().origin().origin())
    }
}

/// 导入一批文件
///
/// 消息以一个临时页面的身份投递，worker 回复的 `CACHE_COMPLETE`
/// 直接作为响应体返回。
pub async fn ingest(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> RouteResult<Json<OutboundMessage>> {
    let worker = state.worker.worker();
    let (page, mut inbox) = worker.open_client();
    let id = page.id();

    let result = state.worker.post_message(message, Some(page)).await;
    worker.clients().unregister(id);

    if result?.is_none() {
        return Err(RouteError::BadRequest("unsupported message type".into()));
    }
    let reply = inbox.try_recv().map_err(|_| RouteError::NotAcknowledged)?;
    Ok(Json(reply))
}

#[derive(Debug, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub origin: String,
    pub cache_name: String,
    pub generation: Option<u64>,
    pub bucket: Option<BucketState>,
    pub entries: usize,
    pub bytes: u64,
    /// 最近一次写入条目的时间（RFC 3339）
    pub updated_at: Option<String>,
    pub clients: usize,
}

pub async fn status(State(state): State<AppState>) -> Json<WorkerStatus> {
    let worker = state.worker.worker();
    let bucket = worker.storage().get(worker.cache_name());
    Json(WorkerStatus {
        state: worker.state(),
        origin: worker.origin().to_string(),
        cache_name: worker.cache_name().to_string(),
        generation: bucket.as_ref().map(|b| b.generation()),
        bucket: bucket.as_ref().map(|b| b.state()),
        entries: bucket.as_ref().map_or(0, |b| b.len()),
        bytes: bucket.as_ref().map_or(0, |b| b.stored_bytes()),
        updated_at: bucket
            .as_ref()
            .and_then(|b| b.last_cached_at())
            .map(|t| t.to_rfc3339()),
        clients: worker.clients().len(),
    })
}

/// 根据 scheme 与 Host 头构造请求的绝对地址
pub fn absolute_uri(scheme: &str, req: &Request) -> RouteResult<Uri> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .ok_or_else(|| RouteError::BadRequest("missing host header".into()))?;
    let path_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{scheme}://{host}{path_query}")
        .parse()
        .map_err(|_| RouteError::BadRequest(format!("invalid request target {host}{path_query}")))
}

fn into_response(response: http::Response<Bytes>) -> Response {
    response.map(Body::from)
}

/// fallback：所有非控制接口的请求
pub async fn intercept(State(state): State<AppState>, req: Request) -> RouteResult<Response> {
    let uri = absolute_uri(state.scheme, &req)?;
    // origin-form 请求一定是发给本机的
    let absolute_form = req.uri().authority().is_some();
    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    let body = to_bytes(body, state.max_body_size)
        .await
        .map_err(|e| RouteError::BadRequest(e.to_string()))?;
    let request = http::Request::from_parts(parts, body);

    let fetch = FetchRequest {
        request,
        client: None,
    };
    let response = match state.worker.fetch(fetch).await? {
        FetchOutcome::FromCache(response) => response,
        FetchOutcome::FromNetwork(result) => result?,
        FetchOutcome::Passthrough(request) => {
            debug!("Request {} not intercepted", request.uri());
            // 不同 origin 的 Host 发往网络只会回到本机
            if !absolute_form && !state.is_own_origin(request.uri()) {
                return Err(RouteError::Misdirected(request.uri().to_string()));
            }
            state.worker.worker().network().fetch(request).await?
        }
    };
    Ok(into_response(response))
}
