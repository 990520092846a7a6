//! 统一状态检测
//!
//! 结合 pane 活动时间、提示符和错误模式判断每个 pane 的状态。

use super::classifier::OutputClassifier;
use super::types::{AgentState, AgentStatus, ErrorCategory};
use crate::clock::{try_seconds, Clock};
use crate::providers::PaneProvider;
use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 检测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// 多久以内有活动算 working（秒）
    pub activity_threshold_secs: u64,
    /// 输出预览最大字符数
    pub output_preview_length: usize,
    /// 扫描的输出行数
    pub scan_lines: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            activity_threshold_secs: 5,
            output_preview_length: 200,
            scan_lines: 50,
        }
    }
}

impl DetectorConfig {
    pub fn activity_threshold(&self) -> Duration {
        try_seconds(self.activity_threshold_secs).unwrap_or(Duration::MAX)
    }
}

/// 统一检测器
pub struct UnifiedDetector {
    config: DetectorConfig,
    classifier: OutputClassifier,
    panes: Arc<dyn PaneProvider>,
    clock: Arc<dyn Clock>,
}

impl UnifiedDetector {
    pub fn new(config: DetectorConfig, panes: Arc<dyn PaneProvider>, clock: Arc<dyn Clock>) -> Self {
        let classifier = OutputClassifier::new().with_scan_lines(config.scan_lines);
        Self {
            config,
            classifier,
            panes,
            clock,
        }
    }

    /// 替换分类器（例如带配置扩展规则的）
    pub fn with_classifier(mut self, classifier: OutputClassifier) -> Self {
        self.classifier = classifier.with_scan_lines(self.config.scan_lines);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// 检测 session 中所有 pane
    ///
    /// 单个 pane 抓取失败不会让整体失败，该 pane 状态记为 Unknown。
    pub fn detect_all(&self, session: &str) -> Result<Vec<AgentStatus>> {
        let panes = self.panes.panes(session)?;
        let mut statuses = Vec::with_capacity(panes.len());

        for pane in panes {
            let now = self.clock.now();
            let last_active = self.panes.pane_activity(&pane.id).ok();

            let mut status = AgentStatus {
                pane_id: pane.id.clone(),
                pane_name: pane.title.clone(),
                agent_type: pane.agent_type,
                state: AgentState::Unknown,
                error_type: ErrorCategory::None,
                last_active,
                last_output: String::new(),
                updated_at: now,
            };

            let output = match self.panes.capture_output(&pane.id, self.config.scan_lines) {
                Ok(output) => output,
                Err(e) => {
                    debug!(pane = %pane.id, error = %e, "Capture failed, status unknown");
                    statuses.push(status);
                    continue;
                }
            };

            status.last_output = tail_chars(output.trim(), self.config.output_preview_length);
            let (state, error_type) = self.classifier.classify_with_activity(
                &output,
                pane.agent_type.as_str(),
                last_active,
                now,
                self.config.activity_threshold(),
            );
            status.state = state;
            status.error_type = error_type;
            statuses.push(status);
        }

        Ok(statuses)
    }
}

/// 末尾 `max` 个字符
fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    s.chars().skip(count - max).collect()
}

/// 各状态计数
pub fn state_summary(statuses: &[AgentStatus]) -> HashMap<AgentState, usize> {
    let mut summary = HashMap::new();
    for s in statuses {
        *summary.entry(s.state).or_insert(0) += 1;
    }
    summary
}

pub fn filter_by_state(statuses: &[AgentStatus], state: AgentState) -> Vec<AgentStatus> {
    statuses.iter().filter(|s| s.state == state).cloned().collect()
}

pub fn has_errors(statuses: &[AgentStatus]) -> bool {
    statuses.iter().any(|s| s.state == AgentState::Error)
}

/// 全部健康；空列表返回 false
pub fn all_healthy(statuses: &[AgentStatus]) -> bool {
    !statuses.is_empty() && statuses.iter().all(AgentStatus::is_healthy)
}
