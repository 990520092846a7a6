//! 文件变更记录
//!
//! 外部变更跟踪器写入的记录，保存在固定容量的环形缓冲中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// 默认容量
pub const DEFAULT_STORE_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeType {
    Added,
    Modified,
    Deleted,
}

/// 一条带归属信息的文件变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: FileChangeType,
    pub timestamp: DateTime<Utc>,
    /// 变更发生时在该 session 中活跃的 agent
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub session: String,
}

impl FileChange {
    pub fn modified(path: impl Into<String>, agent: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            change_type: FileChangeType::Modified,
            timestamp,
            agents: vec![agent.into()],
            session: String::new(),
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }
}

/// 有界变更存储，超出容量时丢弃最旧的记录
pub struct FileChangeStore {
    capacity: usize,
    entries: Mutex<VecDeque<FileChange>>,
}

impl Default for FileChangeStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

impl FileChangeStore {
    /// `capacity` 为 0 时使用默认容量
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_STORE_CAPACITY } else { capacity };
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add(&self, change: FileChange) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(change);
    }

    /// 严格晚于 `ts` 的记录，按写入顺序
    pub fn since(&self, ts: DateTime<Utc>) -> Vec<FileChange> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.timestamp > ts)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<FileChange> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
