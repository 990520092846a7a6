//! 告警数据类型与指纹

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// 告警类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// 超过阈值时间没有输出
    AgentStuck,
    /// pane 进程退出或无法抓取
    AgentCrashed,
    /// agent 输出中检测到错误
    AgentError,
    DiskLow,
    /// 进行中任务长时间未更新
    BeadStale,
    DependencyCycle,
    RateLimit,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::AgentStuck => "agent_stuck",
            AlertType::AgentCrashed => "agent_crashed",
            AlertType::AgentError => "agent_error",
            AlertType::DiskLow => "disk_low",
            AlertType::BeadStale => "bead_stale",
            AlertType::DependencyCycle => "dependency_cycle",
            AlertType::RateLimit => "rate_limit",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警级别，全序 `Info < Warning < Error < Critical`
///
/// 无法识别的级别反序列化为 `Unknown`，排在最低，不会让已有告警升级。
/// 顺序由 [`Severity::rank`] 决定，与变体声明顺序无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    #[serde(other)]
    Unknown,
}

impl Severity {
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Unknown => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    /// 产生告警的探针；该探针失败时不解决它的告警
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pane: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bead_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// pane 级告警，ID 由 `(type, session, pane)` 生成
    pub fn for_pane(
        alert_type: AlertType,
        severity: Severity,
        session: &str,
        pane: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::base(alert_id(alert_type, session, pane), alert_type, severity, message.into(), now)
            .with_location(session, pane)
    }

    /// 任务级告警，ID 由 `(type, "", bead_id)` 生成
    pub fn for_bead(
        alert_type: AlertType,
        severity: Severity,
        bead_id: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut alert = Self::base(alert_id(alert_type, "", bead_id), alert_type, severity, message.into(), now);
        alert.bead_id = bead_id.to_string();
        alert
    }

    /// 主机或项目级告警，ID 由 `(type, "", "")` 生成
    pub fn global(alert_type: AlertType, severity: Severity, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::base(alert_id(alert_type, "", ""), alert_type, severity, message.into(), now)
    }

    fn base(id: String, alert_type: AlertType, severity: Severity, message: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            alert_type,
            severity,
            source: String::new(),
            message,
            session: String::new(),
            pane: String::new(),
            bead_id: String::new(),
            context: BTreeMap::new(),
            created_at: now,
            last_seen_at: now,
            count: 1,
            resolved_at: None,
        }
    }

    fn with_location(mut self, session: &str, pane: &str) -> Self {
        self.session = session.to_string();
        self.pane = pane.to_string();
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// 告警持续时间（已解决的按解决时间计算）
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.resolved_at.unwrap_or(now) - self.created_at
    }
}

/// 告警指纹：`SHA-256("<type>:<session>:<pane>")` 前 8 字节的十六进制
pub fn alert_id(alert_type: AlertType, session: &str, pane: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", alert_type.as_str(), session, pane).as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|byte| format!("{byte:02x}")).collect()
}

/// 告警阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// pane 无活动多少分钟视为卡住
    pub agent_stuck_minutes: u64,
    pub disk_low_threshold_gb: f64,
    pub bead_stale_hours: u64,
    /// 已解决告警保留的分钟数
    pub resolved_prune_minutes: u64,
    /// 每个周期扫描的输出行数
    pub scan_lines: usize,
    /// 磁盘检查与任务查询使用的项目目录
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects_dir: Option<PathBuf>,
    /// 只检查该 session 的 agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_filter: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_stuck_minutes: 5,
            disk_low_threshold_gb: 5.0,
            bead_stale_hours: 24,
            resolved_prune_minutes: 60,
            scan_lines: 50,
            projects_dir: None,
            session_filter: None,
        }
    }
}

/// 活跃告警统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total_active: usize,
    pub total_resolved: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}
