//! 多 agent 编辑冲突检测
//!
//! 只看 modified 记录，按路径分组；只有一个 agent 触碰的路径不算冲突。
//! 三个及以上 agent，或最早与最晚修改间隔不超过 10 分钟时为 critical，否则 warning。

use super::store::{FileChange, FileChangeStore, FileChangeType};
use crate::clock::cutoff;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 时间窗口内的并发修改视为 critical
pub const TIGHT_WINDOW_MINUTES: i64 = 10;
/// 达到该 agent 数量即为 critical
pub const CRITICAL_AGENT_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Warning,
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Warning => f.write_str("warning"),
            ConflictSeverity::Critical => f.write_str("critical"),
        }
    }
}

/// 同一文件被多个 agent 修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub changes: Vec<FileChange>,
    pub severity: ConflictSeverity,
    /// 去重后排序
    pub agents: Vec<String>,
    pub last_at: DateTime<Utc>,
}

/// 检测冲突，结果按路径排序
pub fn detect_conflicts(changes: &[FileChange]) -> Vec<Conflict> {
    let mut by_path: BTreeMap<&str, Vec<&FileChange>> = BTreeMap::new();
    for change in changes.iter().filter(|c| c.change_type == FileChangeType::Modified) {
        by_path.entry(change.path.as_str()).or_default().push(change);
    }

    by_path
        .into_iter()
        .filter_map(|(path, group)| {
            // 单条记录只说明编辑时 session 里有哪些 agent，不构成冲突
            if group.len() < 2 {
                return None;
            }
            let agents: BTreeSet<&str> = group
                .iter()
                .flat_map(|c| c.agents.iter().map(String::as_str))
                .collect();
            if agents.len() <= 1 {
                return None;
            }

            // group 非空，min/max 必然存在
            let first = group.iter().map(|c| c.timestamp).min()?;
            let last = group.iter().map(|c| c.timestamp).max()?;

            Some(Conflict {
                path: path.to_string(),
                changes: group.into_iter().cloned().collect(),
                severity: severity(agents.len(), last - first),
                agents: agents.into_iter().map(str::to_string).collect(),
                last_at: last,
            })
        })
        .collect()
}

fn severity(agent_count: usize, span: Duration) -> ConflictSeverity {
    if agent_count >= CRITICAL_AGENT_COUNT || span <= Duration::minutes(TIGHT_WINDOW_MINUTES) {
        ConflictSeverity::Critical
    } else {
        ConflictSeverity::Warning
    }
}

/// `since` 之后的冲突，可按 session 过滤
pub fn conflicts_since(store: &FileChangeStore, since: DateTime<Utc>, session: Option<&str>) -> Vec<Conflict> {
    let changes: Vec<FileChange> = store
        .since(since)
        .into_iter()
        .filter(|c| session.map_or(true, |s| c.session == s))
        .collect();
    detect_conflicts(&changes)
}

/// 最近 `window` 内的冲突；窗口超出时间范围时取全部记录
pub fn conflicts_recent(store: &FileChangeStore, window: Duration, now: DateTime<Utc>) -> Vec<Conflict> {
    detect_conflicts(&store.since(cutoff(now, window)))
}
