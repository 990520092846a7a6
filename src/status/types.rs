//! 状态检测的数据类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent 当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// 停在提示符，等待输入
    Idle,
    /// 正在产生输出
    Working,
    /// 检测到错误
    Error,
    /// 无法判断
    Unknown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Working => "working",
            AgentState::Error => "error",
            AgentState::Unknown => "unknown",
        }
    }

    /// 状态指示图标
    pub fn icon(&self) -> &'static str {
        match self {
            AgentState::Idle => "⚪",
            AgentState::Working => "🟢",
            AgentState::Error => "🔴",
            AgentState::Unknown => "⚫",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 错误类别
///
/// 变体顺序即检测优先级：限流和认证先于崩溃和通用错误检查，
/// 避免把混在普通消息里的 HTTP 状态码误判成通用错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[default]
    None,
    RateLimit,
    Auth,
    Connection,
    Crash,
    #[serde(rename = "error")]
    Generic,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::None => "",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Crash => "crash",
            ErrorCategory::Generic => "error",
        }
    }

    /// 人类可读描述
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCategory::None => "",
            ErrorCategory::RateLimit => "Rate limited - too many requests",
            ErrorCategory::Auth => "Authentication error",
            ErrorCategory::Connection => "Connection error",
            ErrorCategory::Crash => "Agent crashed",
            ErrorCategory::Generic => "Error detected",
        }
    }

    pub fn is_error(&self) -> bool {
        *self != ErrorCategory::None
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pane 中运行的 agent 类型
///
/// 从 pane 标题里的短代号（`cc`、`cod`、`gmi`）或全名解析。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[serde(rename = "cc")]
    Claude,
    #[serde(rename = "cod")]
    Codex,
    #[serde(rename = "gmi")]
    Gemini,
    Cursor,
    Windsurf,
    Aider,
    /// 普通用户 shell
    User,
    #[default]
    Unknown,
}

impl AgentType {
    /// 解析类型提示，大小写不敏感；无法识别的返回 `Unknown`
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "cc" | "claude" | "claude-code" => AgentType::Claude,
            "cod" | "codex" => AgentType::Codex,
            "gmi" | "gemini" => AgentType::Gemini,
            "cursor" => AgentType::Cursor,
            "windsurf" => AgentType::Windsurf,
            "aider" => AgentType::Aider,
            "user" => AgentType::User,
            _ => AgentType::Unknown,
        }
    }

    /// 有自己提示符的 agent。这类 pane 里出现 shell 提示符说明 agent 已退出。
    pub fn is_known_agent(&self) -> bool {
        !matches!(self, AgentType::User | AgentType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "cc",
            AgentType::Codex => "cod",
            AgentType::Gemini => "gmi",
            AgentType::Cursor => "cursor",
            AgentType::Windsurf => "windsurf",
            AgentType::Aider => "aider",
            AgentType::User => "user",
            AgentType::Unknown => "",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for AgentType {
    fn from(hint: &str) -> Self {
        AgentType::from_hint(hint)
    }
}

/// 单个 pane 的完整状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// tmux pane ID（如 "%0"）
    pub pane_id: String,
    /// pane 标题（如 "myproject__cc_1"）
    pub pane_name: String,
    pub agent_type: AgentType,
    pub state: AgentState,
    #[serde(default, skip_serializing_if = "is_no_error")]
    pub error_type: ErrorCategory,
    /// 最后一次输出活动时间
    pub last_active: Option<DateTime<Utc>>,
    /// 输出末尾预览
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_output: String,
    pub updated_at: DateTime<Utc>,
}

fn is_no_error(category: &ErrorCategory) -> bool {
    !category.is_error()
}

impl AgentStatus {
    /// idle 或 working 视为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self.state, AgentState::Idle | AgentState::Working)
    }

    /// 距离最后活动的时长
    pub fn idle_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_active.map(|t| now - t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_from_hint() {
        assert_eq!(AgentType::from_hint("cc"), AgentType::Claude);
        assert_eq!(AgentType::from_hint("Claude"), AgentType::Claude);
        assert_eq!(AgentType::from_hint("cod"), AgentType::Codex);
        assert_eq!(AgentType::from_hint("gemini"), AgentType::Gemini);
        assert_eq!(AgentType::from_hint("user"), AgentType::User);
        assert_eq!(AgentType::from_hint(""), AgentType::Unknown);
        assert_eq!(AgentType::from_hint("vim"), AgentType::Unknown);
    }

    #[test]
    fn test_known_agents() {
        assert!(AgentType::Claude.is_known_agent());
        assert!(AgentType::Aider.is_known_agent());
        assert!(!AgentType::User.is_known_agent());
        assert!(!AgentType::Unknown.is_known_agent());
    }

    #[test]
    fn test_error_category_serializes_as_wire_names() {
        assert_eq!(serde_json::to_string(&ErrorCategory::RateLimit).unwrap(), "\"rate_limit\"");
        assert_eq!(serde_json::to_string(&ErrorCategory::Generic).unwrap(), "\"error\"");
        assert_eq!(serde_json::to_string(&AgentType::Claude).unwrap(), "\"cc\"");
    }

    #[test]
    fn test_status_health() {
        let mut status = AgentStatus {
            pane_id: "%0".to_string(),
            pane_name: "proj__cc_1".to_string(),
            agent_type: AgentType::Claude,
            state: AgentState::Working,
            error_type: ErrorCategory::None,
            last_active: None,
            last_output: String::new(),
            updated_at: Utc::now(),
        };
        assert!(status.is_healthy());

        status.state = AgentState::Error;
        assert!(!status.is_healthy());
    }
}
