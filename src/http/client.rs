use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, Request, Response};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::{
    consts::USER_AGENT,
    worker::network::{Network, NetworkError, NetworkFuture},
};

/// 基于 reqwest 的网络出口
///
/// 跨域请求按原地址发出；同源请求改写到配置的 upstream，
/// 没有 upstream 时返回 `NetworkError::NoUpstream`，避免请求回到自身。
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
    upstream: Option<Url>,
    timeout: Duration,
}

impl HttpNetwork {
    pub fn new(
        origin: Url,
        upstream: Option<Url>,
        timeout: Duration,
        system_proxy: bool,
    ) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if !system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            origin,
            upstream,
            timeout,
        })
    }

    /// 计算请求实际发往的地址
    pub fn target(&self, url: &Url) -> Result<Url, NetworkError> {
        if url.origin() != self.origin.origin() {
            return Ok(url.clone());
        }
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| NetworkError::NoUpstream(url.to_string()))?;

        let path_query = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let target = format!("{}{}", upstream.as_str().trim_end_matches('/'), path_query);
        Url::parse(&target).map_err(|_| NetworkError::InvalidUrl(target))
    }

    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, NetworkError> {
        let (parts, body) = request.into_parts();
        let uri = parts.uri.to_string();
        let url = Url::parse(&uri).map_err(|_| NetworkError::InvalidUrl(uri))?;
        let target = self.target(&url)?;
        debug!("network request {} {} -> {}", parts.method, url, target);

        let mut forward_req = self
            .client
            .request(parts.method, target.as_str())
            .timeout(self.timeout);
        for (name, value) in parts.headers.iter() {
            if !is_exclude_header(name) {
                forward_req = forward_req.header(name.clone(), value.clone());
            }
        }

        let upstream_res = forward_req
            .body(body)
            .send()
            .await
            .map_err(|e| NetworkError::Request {
                url: target.to_string(),
                reason: e.to_string(),
            })?;

        let status = upstream_res.status();
        let mut headers = HeaderMap::new();
        copy_headers(upstream_res.headers(), &mut headers);
        let body = upstream_res
            .bytes()
            .await
            .map_err(|e| NetworkError::Body {
                url: target.to_string(),
                reason: e.to_string(),
            })?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Network for HttpNetwork {
    fn fetch(&self, request: Request<Bytes>) -> NetworkFuture<'_> {
        Box::pin(self.send(request))
    }
}

/// 检查给定的头部是否应该在转发时被排除
///
/// 逐跳头部（如 "host"、"connection" 等）只对单个连接有效，
/// 转发时需要去掉。
pub fn is_exclude_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "proxy-authenticate"
            | "upgrade"
            | "proxy-authorization"
            | "keep-alive"
            | "transfer-encoding"
            | "te"
    )
}

/// 复制 HTTP 头部，排除逐跳头部
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if !is_exclude_header(name) {
            to.append(name.clone(), value.clone());
        }
    }
}
