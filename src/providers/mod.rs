//! 外部协作者接口
//!
//! - [`PaneProvider`]：终端复用器（列出 session/pane、抓取输出、注入按键）
//! - [`InsightProvider`]：依赖图分析工具（环检测、瓶颈）
//! - [`TaskProvider`]：任务跟踪工具（进行中任务、推荐动作、健康度）
//!
//! 核心逻辑只依赖这些 trait，测试中用内存实现替换。

pub mod beads;
pub mod tmux;

pub use beads::BeadsCli;
pub use tmux::TmuxClient;

use crate::error::ProviderResult;
use crate::status::AgentType;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// tmux session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
}

impl Session {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            windows: 1,
            attached: false,
        }
    }
}

/// tmux pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pane {
    /// 全局唯一 ID，如 "%3"
    pub id: String,
    /// session 内索引
    pub index: u32,
    pub title: String,
    #[serde(default)]
    pub command: String,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Pane {
    pub fn new(id: impl Into<String>, index: u32, title: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            index,
            title: title.into(),
            command: String::new(),
            agent_type,
            variant: None,
            tags: Vec::new(),
        }
    }
}

/// 终端复用器
pub trait PaneProvider: Send + Sync {
    fn list_sessions(&self) -> Result<Vec<Session>>;

    fn panes(&self, session: &str) -> Result<Vec<Pane>>;

    /// 抓取最近 `max_lines` 行输出
    fn capture_output(&self, pane_id: &str, max_lines: usize) -> Result<String>;

    /// 最后一次输出活动时间
    fn pane_activity(&self, pane_id: &str) -> Result<DateTime<Utc>>;

    /// 向 `target` 发送文本；`submit` 为 true 时追加 Enter
    fn send_keys(&self, target: &str, text: &str, submit: bool) -> Result<()>;
}

/// 依赖图中的一个环
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// 节点得分（瓶颈等）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Value", default)]
    pub value: f64,
}

/// 依赖图分析结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    #[serde(rename = "Bottlenecks", default)]
    pub bottlenecks: Vec<NodeScore>,
    #[serde(rename = "Cycles", default)]
    pub cycles: Vec<Cycle>,
}

/// 依赖图分析工具
pub trait InsightProvider: Send + Sync {
    fn insights(&self, dir: &Path) -> ProviderResult<Insights>;
}

/// 进行中的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgressTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub assignee: String,
    pub updated_at: DateTime<Utc>,
}

/// 推荐的下一步动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "issue_id")]
    pub id: String,
    pub title: String,
}

/// 相对基线的漂移状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Ok,
    Critical,
    Warning,
    NoBaseline,
}

impl DriftStatus {
    pub fn has_drift(&self) -> bool {
        matches!(self, DriftStatus::Critical | DriftStatus::Warning)
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriftStatus::Ok => "OK",
            DriftStatus::Critical => "critical",
            DriftStatus::Warning => "warning",
            DriftStatus::NoBaseline => "no baseline",
        };
        f.write_str(s)
    }
}

/// 项目健康度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub drift: DriftStatus,
    #[serde(default)]
    pub drift_message: String,
}

/// 被阻塞的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

/// 进行中任务（依赖摘要用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: String,
    pub title: String,
}

/// 依赖摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyContext {
    pub in_progress: Vec<ActiveTask>,
    pub blocked_count: usize,
    pub ready_count: usize,
    pub top_blockers: Vec<BlockedTask>,
}

/// 任务跟踪工具，所有查询都是尽力而为
pub trait TaskProvider: Send + Sync {
    fn in_progress(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<InProgressTask>>;

    fn top_bottlenecks(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<NodeScore>>;

    fn next_actions(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<Recommendation>>;

    fn health_summary(&self, dir: &Path) -> ProviderResult<HealthSummary>;

    fn dependency_context(&self, dir: &Path, limit: usize) -> ProviderResult<DependencyContext>;
}
