//! 上下文压缩检测
//!
//! AI agent 的对话上下文被总结或截断时，终端里会出现特征文本。
//! 先按 agent 类型匹配专属模式，再匹配通用模式，只返回第一个命中。

use super::ansi::strip_ansi;
use super::types::AgentType;
use crate::clock::{cutoff, Clock};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// 事件日志默认保留时长
pub const DEFAULT_EVENT_MAX_AGE_SECS: i64 = 5 * 60;

/// 一次压缩事件，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionEvent {
    #[serde(default)]
    pub pane_id: String,
    pub agent_type: AgentType,
    pub detected_at: DateTime<Utc>,
    pub matched_text: String,
    /// 规则标识，如 "claude/0"
    pub pattern_id: String,
}

impl CompactionEvent {
    /// 绑定到某个 pane
    pub fn with_pane_id(mut self, pane_id: impl Into<String>) -> Self {
        self.pane_id = pane_id.into();
        self
    }
}

struct CompactionRule {
    id: String,
    regex: Regex,
}

struct RuleGroup {
    /// None 表示通用模式
    agent: Option<AgentType>,
    rules: Vec<CompactionRule>,
}

// "Conversation compacted" 是 Claude Code 显示的原文，置信度最高
const CLAUDE_PATTERNS: &[&str] = &[
    r"Conversation compacted",
    r"(?i)conversation.*summarized",
    r"(?i)context.*compacted",
    r"(?i)continued from.*previous.*conversation",
    r"(?i)ran out of context",
    r"(?i)session is being continued",
    r"(?i)conversation.*truncated",
    r"(?i)previous.*context.*lost",
    r"This session is being continued from a previous conversation",
];

const CODEX_PATTERNS: &[&str] = &[
    r"(?i)context limit reached",
    r"(?i)conversation truncated",
    r"(?i)history.*cleared",
    r"(?i)context.*reset",
];

const GEMINI_PATTERNS: &[&str] = &[
    r"(?i)context window exceeded",
    r"(?i)conversation reset",
    r"(?i)context.*limit",
    r"(?i)history.*truncated",
];

const GENERIC_PATTERNS: &[&str] = &[r"(?i)continuing.*from.*summary", r"(?i)previous.*session.*summarized"];

static GROUPS: LazyLock<Vec<RuleGroup>> = LazyLock::new(|| {
    vec![
        group(Some(AgentType::Claude), "claude", CLAUDE_PATTERNS),
        group(Some(AgentType::Codex), "codex", CODEX_PATTERNS),
        group(Some(AgentType::Gemini), "gemini", GEMINI_PATTERNS),
        group(None, "generic", GENERIC_PATTERNS),
    ]
});

fn group(agent: Option<AgentType>, name: &str, patterns: &[&str]) -> RuleGroup {
    let rules = patterns
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            Regex::new(p).ok().map(|regex| CompactionRule {
                id: format!("{}/{}", name, i),
                regex,
            })
        })
        .collect();
    RuleGroup { agent, rules }
}

/// 检测压缩事件，使用当前时间
pub fn detect_compaction(output: &str, agent_type: AgentType) -> Option<CompactionEvent> {
    detect_compaction_at(output, agent_type, Utc::now())
}

/// 检测压缩事件，`detected_at` 由调用方给定
pub fn detect_compaction_at(output: &str, agent_type: AgentType, now: DateTime<Utc>) -> Option<CompactionEvent> {
    let clean = strip_ansi(output);

    let agent_first = GROUPS.iter().filter(|g| g.agent == Some(agent_type));
    let generic = GROUPS.iter().filter(|g| g.agent.is_none());

    agent_first.chain(generic).find_map(|g| {
        g.rules.iter().find_map(|rule| {
            rule.regex.find(&clean).map(|m| CompactionEvent {
                pane_id: String::new(),
                agent_type,
                detected_at: now,
                matched_text: m.as_str().to_string(),
                pattern_id: rule.id.clone(),
            })
        })
    })
}

/// 最近压缩事件日志
///
/// 记录每次命中，按 `max_age` 在每次访问时清理。
pub struct CompactionLog {
    events: Mutex<Vec<CompactionEvent>>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl CompactionLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_max_age(Duration::seconds(DEFAULT_EVENT_MAX_AGE_SECS), clock)
    }

    pub fn with_max_age(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_age,
            clock,
        }
    }

    /// 检测并记录
    pub fn check(&self, output: &str, agent_type: AgentType, pane_id: &str) -> Option<CompactionEvent> {
        let now = self.clock.now();
        let event = detect_compaction_at(output, agent_type, now)?.with_pane_id(pane_id);

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push(event.clone());
        Self::prune(&mut events, cutoff(now, self.max_age));
        Some(event)
    }

    pub fn events(&self) -> Vec<CompactionEvent> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Self::prune(&mut events, cutoff(self.clock.now(), self.max_age));
        events.clone()
    }

    pub fn events_for_pane(&self, pane_id: &str) -> Vec<CompactionEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.pane_id == pane_id)
            .collect()
    }

    /// pane 在 `within` 内是否出现过压缩
    pub fn has_recent(&self, pane_id: &str, within: Duration) -> bool {
        let since = cutoff(self.clock.now(), within);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.pane_id == pane_id && e.detected_at > since)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn prune(events: &mut Vec<CompactionEvent>, since: DateTime<Utc>) {
        events.retain(|e| e.detected_at > since);
    }
}
