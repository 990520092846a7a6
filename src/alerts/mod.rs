//! 告警
//!
//! 生成器每个周期产出一批候选告警和失败来源列表，跟踪器据此维护活跃 / 已解决集合。

pub mod disk;
pub mod generator;
pub mod output;
pub mod tracker;
pub mod types;

pub use disk::{DiskProbe, DiskSpace, SysinfoDiskProbe};
pub use generator::{AlertGenerator, Generation, SOURCE_AGENTS, SOURCE_DISK, SOURCE_INSIGHTS, SOURCE_TASKS};
pub use output::{alert_lines, AlertsOutput};
pub use tracker::{AlertTracker, TrackerSnapshot};
pub use types::{alert_id, Alert, AlertConfig, AlertSummary, AlertType, Severity};
