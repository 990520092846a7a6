//! Agent 状态检测
//!
//! - `classifier`：输出分类（状态 + 错误类别）
//! - `compaction`：上下文压缩检测
//! - `detector`：基于 PaneProvider 的批量检测
//! - `recovery`：压缩后的恢复提示

pub mod ansi;
pub mod classifier;
pub mod compaction;
pub mod context;
pub mod detector;
pub mod patterns;
pub mod recovery;
pub mod types;

pub use ansi::strip_ansi;
pub use classifier::{classify, detect_compaction, is_at_prompt, OutputClassifier};
pub use compaction::{detect_compaction_at, CompactionEvent, CompactionLog};
pub use context::{build_recovery_prompt, ProjectContext};
pub use detector::{all_healthy, filter_by_state, has_errors, state_summary, DetectorConfig, UnifiedDetector};
pub use patterns::{last_non_empty_line, ErrorMatch, Ruleset, RulesetBuilder, DEFAULT_SCAN_LINES};
pub use recovery::{
    pane_key, FailedSendPolicy, GateRefusal, PaneRecoveryState, RecoveryConfig, RecoveryEvent, RecoveryManager,
    RecoveryOutcome, DEFAULT_RECOVERY_PROMPT,
};
pub use types::{AgentState, AgentStatus, AgentType, ErrorCategory};
