//! 审计日志 - 本地 JSONL 文件追加写入（带文件锁）

use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::AuditStore;
use crate::error::{StoreError, StoreResult};
use crate::model::AuditRecord;

/// 审计存储：每行一条 [`AuditRecord`]
#[derive(Debug, Clone)]
pub struct JsonlAuditStore {
    path: PathBuf,
}

impl JsonlAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录（独占锁，阻塞调用）
    pub fn append_blocking(&self, record: &AuditRecord) -> StoreResult<()> {
        use fs2::FileExt;

        // 确保目录存在
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let line = serde_json::to_string(record)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let written = writeln!(file, "{}", line);
        file.unlock()?;
        written?;
        Ok(())
    }

    /// 读取最近 N 条记录，跳过无法解析的行
    pub fn read_recent(&self, n: usize) -> Vec<AuditRecord> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let records: Vec<AuditRecord> = BufReader::new(file)
            .lines()
            .filter_map(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&record))
            .await
            .map_err(|e| StoreError::Unavailable(format!("audit writer task failed: {}", e)))?
    }
}
