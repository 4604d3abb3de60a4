//! 导入压缩包文件
//!
//! 每个批次先删除旧缓存、再创建新的 bucket，然后逐个写入文件。
//! 单个文件失败只记录在报告中，不会中断其余文件。

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Client, Worker, WorkerError,
    message::{BatchReport, EntryFailure, FileEntry, InboundMessage, OutboundMessage},
    storage::{CacheBucket, CacheError, StoredResponse},
};

#[derive(thiserror::Error, Debug)]
pub enum EntryError {
    #[error("invalid path {path:?}: {source}")]
    InvalidPath {
        path: String,
        source: url::ParseError,
    },
    #[error("path {path:?} resolves outside of {origin}")]
    ForeignOrigin { path: String, origin: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug)]
pub enum EntryOutcome {
    Stored { path: String, url: String },
    Failed { path: String, error: EntryError },
}

impl From<Vec<EntryOutcome>> for BatchReport {
    fn from(outcomes: Vec<EntryOutcome>) -> Self {
        let total = outcomes.len();
        let mut stored = 0;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                EntryOutcome::Stored { .. } => stored += 1,
                EntryOutcome::Failed { path, error } => failures.push(EntryFailure {
                    path,
                    reason: error.to_string(),
                }),
            }
        }
        BatchReport {
            total,
            stored,
            failures,
        }
    }
}

/// 将文件路径解析为 worker origin 下的绝对 URL
///
/// 与浏览器中 `new URL(path, origin)` 的行为一致，片段部分会被去掉。
pub fn resolve_entry_url(origin: &Url, path: &str) -> Result<Url, EntryError> {
    let mut url = origin.join(path).map_err(|source| EntryError::InvalidPath {
        path: path.to_string(),
        source,
    })?;
    if url.origin() != origin.origin() {
        return Err(EntryError::ForeignOrigin {
            path: path.to_string(),
            origin: origin.origin().ascii_serialization(),
        });
    }
    url.set_fragment(None);
    Ok(url)
}

async fn store_entry(worker: &Worker, bucket: &CacheBucket, entry: FileEntry) -> EntryOutcome {
    let FileEntry { path, blob } = entry;
    let result = resolve_entry_url(worker.origin(), &path).and_then(|url| {
        let response = StoredResponse::from_blob(url.path(), blob);
        bucket.put(url.as_str(), response)?;
        Ok(url)
    });

    match result {
        Ok(url) => {
            debug!("Cached: {}", path);
            EntryOutcome::Stored {
                path,
                url: url.into(),
            }
        }
        Err(error) => {
            warn!("Failed to cache {}: {}", path, error);
            EntryOutcome::Failed { path, error }
        }
    }
}

/// 用一个批次替换缓存内容
///
/// 删除或创建 bucket 失败时直接返回错误；所有文件处理完毕后 bucket 才标记为可用。
pub async fn ingest_batch(worker: &Worker, files: Vec<FileEntry>) -> Result<BatchReport, WorkerError> {
    let storage = worker.storage();
    storage.delete(worker.cache_name())?;
    let bucket = storage.create(worker.cache_name())?;
    info!(
        "Caching {} files into {} generation {}",
        files.len(),
        worker.cache_name(),
        bucket.generation()
    );

    let outcomes = join_all(
        files
            .into_iter()
            .map(|entry| store_entry(worker, &bucket, entry)),
    )
    .await;
    bucket.seal();

    let report = BatchReport::from(outcomes);
    if report.is_complete() {
        info!("Cached {} files", report.stored);
    } else {
        warn!(
            "Cached {} of {} files, {} failed",
            report.stored,
            report.total,
            report.failures.len()
        );
    }
    Ok(report)
}

/// 处理前台发来的消息
///
/// 导入完成后向消息来源回复 `CACHE_COMPLETE`，其它类型的消息被忽略。
pub async fn handle_message(
    worker: &Worker,
    data: InboundMessage,
    source: Option<&Client>,
) -> Result<Option<BatchReport>, WorkerError> {
    let files = match data {
        InboundMessage::CacheZipFiles { files } => files,
        InboundMessage::Unknown => {
            debug!("Ignoring message of unknown type");
            return Ok(None);
        }
    };

    info!("Received {} files from the page, caching", files.len());
    let report = ingest_batch(worker, files).await?;

    if let Some(source) = source {
        let message = OutboundMessage::from(report.clone());
        if !source.post_message(message) {
            warn!("{} closed before the cache completed", source.id());
        }
    }
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{
        storage::{BucketState, CacheLimits},
        test_support::*,
    };

    fn origin() -> Url {
        Url::parse(ORIGIN).unwrap()
    }

    #[test]
    fn test_resolve_entry_url() {
        let origin = origin();
        assert_eq!(
            resolve_entry_url(&origin, "/index.html").unwrap().as_str(),
            "http://localhost:8080/index.html"
        );
        assert_eq!(
            resolve_entry_url(&origin, "css/site.css").unwrap().as_str(),
            "http://localhost:8080/css/site.css"
        );
        assert_eq!(
            resolve_entry_url(&origin, "/docs/a b.html#top").unwrap().as_str(),
            "http://localhost:8080/docs/a%20b.html"
        );
        assert_eq!(
            resolve_entry_url(&origin, "../../etc/passwd").unwrap().as_str(),
            "http://localhost:8080/etc/passwd"
        );
    }

    #[test]
    fn test_resolve_rejects_foreign_origin() {
        let err = resolve_entry_url(&origin(), "https://example.com/x.js").unwrap_err();
        assert!(matches!(err, EntryError::ForeignOrigin { .. }));
        let err = resolve_entry_url(&origin(), "//example.com/x.js").unwrap_err();
        assert!(matches!(err, EntryError::ForeignOrigin { .. }));
    }

    #[tokio::test]
    async fn test_batch_stores_every_entry() {
        let (worker, _network) = test_worker(CacheLimits::default());
        let files = vec![
            FileEntry::new("/index.html", "<h1>Hi</h1>"),
            FileEntry::new("/img/logo.png", vec![0x89u8, 0x50, 0x4e, 0x47]),
        ];
        let report = ingest_batch(&worker, files).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.stored, 2);
        assert!(report.is_complete());

        let bucket = worker.storage().open(worker.cache_name()).unwrap();
        assert_eq!(bucket.state(), BucketState::Ready);
        let logo = bucket.match_url("http://localhost:8080/img/logo.png").unwrap();
        assert_eq!(logo.body.as_ref(), &[0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(logo.headers[http::header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (worker, _network) = test_worker(CacheLimits {
            max_entry_bytes: Some(8),
            quota_bytes: None,
        });
        let files = vec![
            FileEntry::new("/a.txt", "small"),
            FileEntry::new("/big.bin", "definitely too large"),
            FileEntry::new("https://example.com/x.js", "x"),
            FileEntry::new("/b.txt", "also ok"),
        ];
        let report = ingest_batch(&worker, files).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.stored, 2);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, ["/big.bin", "https://example.com/x.js"]);

        let bucket = worker.storage().open(worker.cache_name()).unwrap();
        assert_eq!(
            bucket.keys(),
            ["http://localhost:8080/a.txt", "http://localhost:8080/b.txt"]
        );
    }

    #[tokio::test]
    async fn test_new_batch_leaves_no_residue() {
        let (worker, _network) = test_worker(CacheLimits::default());
        ingest_batch(
            &worker,
            vec![
                FileEntry::new("/a.txt", "old"),
                FileEntry::new("/only-old.txt", "old"),
            ],
        )
        .await
        .unwrap();
        ingest_batch(&worker, vec![FileEntry::new("/a.txt", "new")])
            .await
            .unwrap();

        let bucket = worker.storage().open(worker.cache_name()).unwrap();
        assert_eq!(bucket.keys(), ["http://localhost:8080/a.txt"]);
        let a = bucket.match_url("http://localhost:8080/a.txt").unwrap();
        assert_eq!(a.body.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_same_batch_twice_is_idempotent() {
        let (worker, _network) = test_worker(CacheLimits::default());
        let files = vec![
            FileEntry::new("/index.html", "<h1>Hi</h1>"),
            FileEntry::new("/app.js", "console.log(1)"),
        ];

        ingest_batch(&worker, files.clone()).await.unwrap();
        let once = worker.storage().open(worker.cache_name()).unwrap();
        let once_keys = once.keys();
        let once_bytes = once.stored_bytes();

        ingest_batch(&worker, files).await.unwrap();
        let twice = worker.storage().open(worker.cache_name()).unwrap();
        assert_eq!(twice.keys(), once_keys);
        assert_eq!(twice.stored_bytes(), once_bytes);
        assert!(twice.generation() > once.generation());
    }

    #[tokio::test]
    async fn test_message_replies_to_source() {
        let (worker, _network) = test_worker(CacheLimits::default());
        let (page, mut inbox) = worker.clients().register(true);
        let data = InboundMessage::CacheZipFiles {
            files: vec![FileEntry::new("/index.html", "<h1>Hi</h1>")],
        };

        let report = handle_message(&worker, data, Some(&page)).await.unwrap();
        assert_eq!(report.map(|r| r.total), Some(1));

        let OutboundMessage::CacheComplete { message, report } = inbox.try_recv().unwrap();
        assert_eq!(
            message,
            "Emulation ready! Successfully cached 1 files from the ZIP."
        );
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_unknown_message_does_not_touch_cache() {
        let (worker, _network) = test_worker(CacheLimits::default());
        let generation = worker.storage().generation();
        let report = handle_message(&worker, InboundMessage::Unknown, None)
            .await
            .unwrap();
        assert!(report.is_none());
        assert_eq!(worker.storage().generation(), generation);
    }

    #[tokio::test]
    async fn test_closed_storage_sends_no_completion() {
        let (worker, _network) = test_worker(CacheLimits::default());
        let (page, mut inbox) = worker.clients().register(true);
        worker.storage().close();

        let data = InboundMessage::CacheZipFiles {
            files: vec![FileEntry::new("/index.html", "<h1>Hi</h1>")],
        };
        let err = handle_message(&worker, data, Some(&page)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cache(CacheError::StorageClosed)));
        assert!(inbox.try_recv().is_err());
    }
}
