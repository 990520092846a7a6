//! Agent Fleet Monitor - 监控运行在 tmux pane 中的 AI 编码 agent
//!
//! - [`status`]：输出分类、压缩检测、恢复提示
//! - [`alerts`]：告警生成与生命周期
//! - [`changes`]：多 agent 文件冲突检测
//! - [`supervisor`]：把以上组件串成一个监控周期

pub mod alerts;
pub mod changes;
pub mod clock;
pub mod config;
pub mod error;
pub mod providers;
pub mod status;
pub mod supervisor;

pub use alerts::{
    alert_lines, Alert, AlertConfig, AlertGenerator, AlertSummary, AlertTracker, AlertType, AlertsOutput, Severity,
};
pub use changes::{detect_conflicts, Conflict, ConflictSeverity, FileChange, FileChangeStore, FileChangeType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitorConfig;
pub use error::{ProviderError, ProviderResult};
pub use providers::{BeadsCli, InsightProvider, PaneProvider, TaskProvider, TmuxClient};
pub use status::{
    classify, detect_compaction, is_at_prompt, AgentState, AgentStatus, AgentType, CompactionEvent, ErrorCategory,
    OutputClassifier, RecoveryManager, RecoveryOutcome,
};
pub use supervisor::{CycleReport, Providers, Supervisor};
