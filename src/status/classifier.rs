//! 输出分类器
//!
//! 把原始 pane 文本映射为 (状态, 错误类别)。纯函数，无共享可变状态，
//! 可以在任意多个线程中并发调用。
//!
//! 判定优先级：错误 > 空闲 > 近期活动（working）> unknown。

use super::compaction::{detect_compaction_at, CompactionEvent};
use super::patterns::{ErrorMatch, Ruleset, DEFAULT_SCAN_LINES};
use super::types::{AgentState, AgentType, ErrorCategory};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// 输出分类器
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    rules: Arc<Ruleset>,
    scan_lines: usize,
}

impl OutputClassifier {
    /// 使用内置规则
    pub fn new() -> Self {
        Self::with_ruleset(Ruleset::builtin())
    }

    pub fn with_ruleset(rules: Arc<Ruleset>) -> Self {
        Self {
            rules,
            scan_lines: DEFAULT_SCAN_LINES,
        }
    }

    /// 设置错误扫描窗口
    pub fn with_scan_lines(mut self, scan_lines: usize) -> Self {
        self.scan_lines = scan_lines.max(1);
        self
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.rules
    }

    /// 仅凭文本分类
    ///
    /// 没有活动时间就无法证明 working，此时非错误、非空闲的输出返回 `Unknown`。
    pub fn classify(&self, text: &str, hint: &str) -> (AgentState, ErrorCategory) {
        self.classify_inner(text, AgentType::from_hint(hint), None)
    }

    /// 结合 pane 最后活动时间分类：活动在 `threshold` 内视为 working
    pub fn classify_with_activity(
        &self,
        text: &str,
        hint: &str,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> (AgentState, ErrorCategory) {
        let recent = last_activity.map(|t| now - t < threshold).unwrap_or(false);
        self.classify_inner(text, AgentType::from_hint(hint), Some(recent))
    }

    fn classify_inner(&self, text: &str, agent: AgentType, recently_active: Option<bool>) -> (AgentState, ErrorCategory) {
        if let Some(hit) = self.rules.detect_error(text, self.scan_lines) {
            return (AgentState::Error, hit.category);
        }

        // 空输出的 user pane 在 detect_idle 内已处理
        if self.rules.detect_idle(text, agent) {
            return (AgentState::Idle, ErrorCategory::None);
        }

        if recently_active == Some(true) {
            return (AgentState::Working, ErrorCategory::None);
        }

        (AgentState::Unknown, ErrorCategory::None)
    }

    /// 检测错误并返回命中行
    pub fn detect_error(&self, text: &str) -> Option<ErrorMatch> {
        self.rules.detect_error(text, self.scan_lines)
    }

    pub fn detect_all_errors(&self, text: &str) -> Vec<ErrorCategory> {
        self.rules.detect_all_errors(text, self.scan_lines)
    }

    pub fn is_at_prompt(&self, line: &str, hint: &str) -> bool {
        self.rules.is_prompt_line(line, AgentType::from_hint(hint))
    }

    pub fn detect_idle(&self, text: &str, hint: &str) -> bool {
        self.rules.detect_idle(text, AgentType::from_hint(hint))
    }

    /// 已知 agent 的 pane 停在 shell 提示符
    pub fn looks_exited(&self, text: &str, hint: &str) -> bool {
        self.rules.looks_exited(text, AgentType::from_hint(hint))
    }

    /// 检测压缩，`now` 由调用方的时钟给出
    pub fn detect_compaction(&self, text: &str, hint: &str, now: DateTime<Utc>) -> Option<CompactionEvent> {
        detect_compaction_at(text, AgentType::from_hint(hint), now)
    }
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// 使用内置规则分类
pub fn classify(text: &str, hint: &str) -> (AgentState, ErrorCategory) {
    OutputClassifier::new().classify(text, hint)
}

/// 使用内置规则判断提示符
pub fn is_at_prompt(line: &str, hint: &str) -> bool {
    OutputClassifier::new().is_at_prompt(line, hint)
}

/// 使用内置规则检测压缩，`detected_at` 取系统时间；
/// 需要可控时间时用 [`OutputClassifier::detect_compaction`] 或 `CompactionLog`
pub fn detect_compaction(text: &str, hint: &str) -> Option<CompactionEvent> {
    OutputClassifier::new().detect_compaction(text, hint, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_wins_over_prompt() {
        let text = "Error: 429 Too Many Requests\nclaude> ";
        assert_eq!(classify(text, "cc"), (AgentState::Error, ErrorCategory::RateLimit));
    }

    #[test]
    fn test_idle_at_prompt() {
        assert_eq!(classify("Done\nclaude> ", "cc"), (AgentState::Idle, ErrorCategory::None));
    }

    #[test]
    fn test_known_agent_empty_output_is_unknown() {
        assert_eq!(classify("", "cc"), (AgentState::Unknown, ErrorCategory::None));
        assert_eq!(classify("", "user"), (AgentState::Idle, ErrorCategory::None));
        assert_eq!(classify("", ""), (AgentState::Idle, ErrorCategory::None));
    }

    #[test]
    fn test_shell_prompt_in_agent_pane_not_idle() {
        let (state, _) = classify("user@host:~$ ", "cod");
        assert_ne!(state, AgentState::Idle);
    }

    #[test]
    fn test_recent_activity_is_working() {
        let classifier = OutputClassifier::new();
        let now = Utc::now();

        let (state, _) = classifier.classify_with_activity(
            "Reading src/main.rs",
            "cc",
            Some(now - Duration::seconds(2)),
            now,
            Duration::seconds(5),
        );
        assert_eq!(state, AgentState::Working);

        let (state, _) = classifier.classify_with_activity(
            "Reading src/main.rs",
            "cc",
            Some(now - Duration::seconds(30)),
            now,
            Duration::seconds(5),
        );
        assert_eq!(state, AgentState::Unknown);
    }

    #[test]
    fn test_is_at_prompt_free_function() {
        assert!(is_at_prompt("claude> ", "cc"));
        assert!(!is_at_prompt("user@host:~$ ", "cod"));
    }

    #[test]
    fn test_detect_compaction_free_function() {
        let event = detect_compaction("Conversation compacted", "claude").unwrap();
        assert_eq!(event.matched_text, "Conversation compacted");
    }

    #[test]
    fn test_narrow_scan_window() {
        let classifier = OutputClassifier::new().with_scan_lines(1);
        let text = "panic: boom\nstill running";
        assert!(classifier.detect_error(text).is_none());
    }
}
