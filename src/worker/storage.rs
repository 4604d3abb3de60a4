//! 模拟站点的缓存存储
//!
//! `CacheStorage` 是 worker 独占的存储句柄，按名称管理若干 `CacheBucket`。
//! 每次新建 bucket 都会分配一个单调递增的 generation，拦截流程通过
//! generation 与 bucket 状态判断读取是否发生在导入过程中。

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::{
    HeaderMap, HeaderValue, Method, Response, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use serde::Serialize;
use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache storage is closed")]
    StorageClosed,
    #[error("cache {name} generation {generation} is no longer live")]
    Detached { name: String, generation: u64 },
    #[error("entry {url} is {size} bytes, the per entry limit is {limit} bytes")]
    EntryTooLarge { url: String, size: u64, limit: u64 },
    #[error("storing {url} would exceed the cache quota of {quota} bytes")]
    QuotaExceeded { url: String, quota: u64 },
}

/// 单个条目与整个存储的容量限制，`None` 表示不限制
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheLimits {
    pub max_entry_bytes: Option<u64>,
    pub quota_bytes: Option<u64>,
}

/// 导入时合成的响应
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
    /// 为文件内容构造 `200 OK` 响应
    ///
    /// Content-Type 由文件路径推断，扩展名未知时为 `application/octet-stream`。
    pub fn from_blob(path: &str, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        Self {
            status: StatusCode::OK,
            headers,
            body,
            cached_at: Utc::now(),
        }
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// 转换为 HTTP 响应，HEAD 请求只返回头部
    pub fn to_response(&self, method: &Method) -> Response<Bytes> {
        let body = if method == Method::HEAD {
            Bytes::new()
        } else {
            self.body.clone()
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    /// 导入批次正在写入
    Filling,
    Ready,
}

#[derive(Debug)]
pub struct CacheBucket {
    name: String,
    generation: u64,
    entries: DashMap<String, StoredResponse>,
    stored_bytes: AtomicU64,
    ready: AtomicBool,
    live: AtomicBool,
    limits: CacheLimits,
    lookups: Arc<AtomicU64>,
}

impl CacheBucket {
    fn new(
        name: &str,
        generation: u64,
        state: BucketState,
        limits: CacheLimits,
        lookups: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name: name.to_string(),
            generation,
            entries: DashMap::new(),
            stored_bytes: AtomicU64::new(0),
            ready: AtomicBool::new(state == BucketState::Ready),
            live: AtomicBool::new(true),
            limits,
            lookups,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> BucketState {
        if self.ready.load(Ordering::Acquire) {
            BucketState::Ready
        } else {
            BucketState::Filling
        }
    }

    /// 标记导入完成
    pub fn seal(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn detach(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes.load(Ordering::Acquire)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// 写入一个条目，同一 URL 的旧条目会被覆盖
    ///
    /// 已被删除或替换的 bucket 拒绝写入，避免过期批次的写入混入新站点。
    pub fn put(&self, url: &str, response: StoredResponse) -> Result<(), CacheError> {
        if !self.is_live() {
            return Err(CacheError::Detached {
                name: self.name.clone(),
                generation: self.generation,
            });
        }

        let size = response.size();
        if let Some(limit) = self.limits.max_entry_bytes
            && size > limit
        {
            return Err(CacheError::EntryTooLarge {
                url: url.to_string(),
                size,
                limit,
            });
        }

        let previous = self.entries.get(url).map(|e| e.size()).unwrap_or(0);
        let quota = self.limits.quota_bytes;
        self.stored_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                let next = used.saturating_sub(previous) + size;
                match quota {
                    Some(quota) if next > quota => None,
                    _ => Some(next),
                }
            })
            .map_err(|_| CacheError::QuotaExceeded {
                url: url.to_string(),
                quota: quota.unwrap_or_default(),
            })?;

        self.entries.insert(url.to_string(), response);
        debug!("Cache {} generation {} put {}", self.name, self.generation, url);
        Ok(())
    }

    /// 最近一次写入条目的时间
    pub fn last_cached_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.value().cached_at).max()
    }

    /// 按 URL 精确匹配
    pub fn match_url(&self, url: &str) -> Option<StoredResponse> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.entries.get(url).map(|e| e.value().clone())
    }
}

#[derive(Debug)]
struct StorageInner {
    buckets: DashMap<String, Arc<CacheBucket>>,
    generation: AtomicU64,
    closed: AtomicBool,
    limits: CacheLimits,
    lookups: Arc<AtomicU64>,
}

/// worker 持有的缓存存储句柄，克隆后共享同一份数据
#[derive(Debug, Clone)]
pub struct CacheStorage {
    inner: Arc<StorageInner>,
}

impl CacheStorage {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                buckets: DashMap::new(),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                limits,
                lookups: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(CacheError::StorageClosed);
        }
        Ok(())
    }

    fn new_bucket(&self, name: &str, state: BucketState) -> Arc<CacheBucket> {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Arc::new(CacheBucket::new(
            name,
            generation,
            state,
            self.inner.limits,
            self.inner.lookups.clone(),
        ))
    }

    /// 删除 bucket，不存在时返回 `false`
    pub fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        match self.inner.buckets.remove(name) {
            Some((_, bucket)) => {
                bucket.detach();
                debug!("Cache {} generation {} deleted", name, bucket.generation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 打开 bucket，不存在时创建一个空的可用 bucket
    pub fn open(&self, name: &str) -> Result<Arc<CacheBucket>, CacheError> {
        self.ensure_open()?;
        let bucket = self
            .inner
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| self.new_bucket(name, BucketState::Ready))
            .clone();
        Ok(bucket)
    }

    /// 创建一个处于 `Filling` 状态的新 bucket，替换同名的旧 bucket
    pub fn create(&self, name: &str) -> Result<Arc<CacheBucket>, CacheError> {
        self.ensure_open()?;
        let bucket = self.new_bucket(name, BucketState::Filling);
        if let Some(old) = self.inner.buckets.insert(name.to_string(), bucket.clone()) {
            old.detach();
        }
        debug!("Cache {} generation {} created", name, bucket.generation);
        Ok(bucket)
    }

    /// 获取已存在的 bucket，不会创建
    pub fn get(&self, name: &str) -> Option<Arc<CacheBucket>> {
        self.inner.buckets.get(name).map(|b| b.value().clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.buckets.contains_key(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.buckets.iter().map(|b| b.key().clone()).collect()
    }

    /// 当前同名 bucket 的 generation
    pub fn live_generation(&self, name: &str) -> Option<u64> {
        self.inner.buckets.get(name).map(|b| b.generation)
    }

    /// 最近一次分配的 generation
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// 自创建以来的查找次数
    pub fn lookup_count(&self) -> u64 {
        self.inner.lookups.load(Ordering::Relaxed)
    }

    /// 关闭存储并丢弃所有 bucket
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.buckets.retain(|_, bucket| {
            bucket.detach();
            false
        });
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
