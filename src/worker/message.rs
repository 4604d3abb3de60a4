//! 前台与 worker 之间的消息协议
//!
//! 消息以 `type` 字段区分，二进制内容在 JSON 中以 base64 表示。

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 压缩包中的单个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// 相对站点根目录的路径
    pub path: String,
    #[serde(with = "blob")]
    pub blob: Bytes,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, blob: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            blob: blob.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    CacheZipFiles {
        files: Vec<FileEntry>,
    },
    /// 未识别的消息类型，worker 直接忽略
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    CacheComplete { message: String, report: BatchReport },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub path: String,
    pub reason: String,
}

/// 一个导入批次的结果汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// 批次中的文件数量
    pub total: usize,
    /// 成功写入的数量
    pub stored: usize,
    pub failures: Vec<EntryFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// 发送给前台的可读摘要
    pub fn summary(&self) -> String {
        if self.is_complete() {
            format!(
                "Emulation ready! Successfully cached {} files from the ZIP.",
                self.total
            )
        } else {
            format!(
                "Emulation ready with errors: cached {} of {} files from the ZIP, {} failed.",
                self.stored,
                self.total,
                self.failures.len()
            )
        }
    }
}

impl From<BatchReport> for OutboundMessage {
    fn from(report: BatchReport) -> Self {
        OutboundMessage::CacheComplete {
            message: report.summary(),
            report,
        }
    }
}

mod blob {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(blob: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cache_zip_files() {
        let raw = json!({
            "type": "CACHE_ZIP_FILES",
            "files": [
                { "path": "/index.html", "blob": "PGgxPkhpPC9oMT4=" }
            ]
        });
        let message: InboundMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(
            message,
            InboundMessage::CacheZipFiles {
                files: vec![FileEntry::new("/index.html", "<h1>Hi</h1>")]
            }
        );
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let message: InboundMessage =
            serde_json::from_value(json!({ "type": "PING" })).unwrap();
        assert_eq!(message, InboundMessage::Unknown);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let raw = json!({
            "type": "CACHE_ZIP_FILES",
            "files": [{ "path": "/a", "blob": "not base64!" }]
        });
        assert!(serde_json::from_value::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn test_cache_complete_shape() {
        let report = BatchReport {
            total: 2,
            stored: 1,
            failures: vec![EntryFailure {
                path: "/big.bin".to_string(),
                reason: "too large".to_string(),
            }],
        };
        let value = serde_json::to_value(OutboundMessage::from(report)).unwrap();
        assert_eq!(value["type"], "CACHE_COMPLETE");
        assert_eq!(
            value["message"],
            "Emulation ready with errors: cached 1 of 2 files from the ZIP, 1 failed."
        );
        assert_eq!(value["report"]["total"], 2);
        assert_eq!(value["report"]["failures"][0]["path"], "/big.bin");
    }

    #[test]
    fn test_summary_reports_batch_size() {
        let report = BatchReport {
            total: 1,
            stored: 1,
            failures: vec![],
        };
        assert_eq!(
            report.summary(),
            "Emulation ready! Successfully cached 1 files from the ZIP."
        );
    }
}
