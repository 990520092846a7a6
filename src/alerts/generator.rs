//! 告警生成
//!
//! 每个周期独立运行四个探测：agent 输出、磁盘空间、依赖环、停滞任务。
//! 单个探测失败只记录到 `failed_sources`，不会中断其他探测；
//! 外部工具未安装属于正常情况，静默跳过。

use super::disk::DiskProbe;
use super::types::{Alert, AlertConfig, AlertType, Severity};
use crate::clock::{try_hours, try_minutes, Clock};
use crate::error::ProviderError;
use crate::providers::{InsightProvider, Pane, PaneProvider, TaskProvider};
use crate::status::{ErrorCategory, OutputClassifier};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SOURCE_AGENTS: &str = "agents";
pub const SOURCE_DISK: &str = "disk";
pub const SOURCE_INSIGHTS: &str = "insights";
pub const SOURCE_TASKS: &str = "tasks";

/// 磁盘低于该值升级为 Critical
const DISK_CRITICAL_GB: f64 = 1.0;
/// 停滞任务查询上限
const STALE_TASK_LIMIT: usize = 100;
/// matched_line 最大长度
const MATCHED_LINE_MAX: usize = 200;

/// 一次生成的结果
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub alerts: Vec<Alert>,
    /// 本周期未能完成的探测
    pub failed_sources: Vec<String>,
}

/// 告警生成器
pub struct AlertGenerator {
    config: AlertConfig,
    classifier: OutputClassifier,
    panes: Arc<dyn PaneProvider>,
    disk: Option<Arc<dyn DiskProbe>>,
    insights: Option<Arc<dyn InsightProvider>>,
    tasks: Option<Arc<dyn TaskProvider>>,
    clock: Arc<dyn Clock>,
}

impl AlertGenerator {
    pub fn new(config: AlertConfig, panes: Arc<dyn PaneProvider>, clock: Arc<dyn Clock>) -> Self {
        let classifier = OutputClassifier::new().with_scan_lines(config.scan_lines);
        Self {
            config,
            classifier,
            panes,
            disk: None,
            insights: None,
            tasks: None,
            clock,
        }
    }

    pub fn with_classifier(mut self, classifier: OutputClassifier) -> Self {
        self.classifier = classifier.with_scan_lines(self.config.scan_lines);
        self
    }

    pub fn with_disk_probe(mut self, disk: Arc<dyn DiskProbe>) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn with_insights(mut self, insights: Arc<dyn InsightProvider>) -> Self {
        self.insights = Some(insights);
        self
    }

    pub fn with_tasks(mut self, tasks: Arc<dyn TaskProvider>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    fn project_dir(&self) -> PathBuf {
        self.config
            .projects_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// 运行所有探测
    pub fn generate_all(&self) -> Generation {
        let mut out = Generation::default();
        if !self.config.enabled {
            return out;
        }

        let now = self.clock.now();

        match self.check_agents(now) {
            Ok((alerts, complete)) => {
                out.alerts.extend(alerts);
                if !complete {
                    out.failed_sources.push(SOURCE_AGENTS.to_string());
                }
            }
            Err(e) => {
                warn!(source = SOURCE_AGENTS, error = %e, "Agent check failed");
                out.failed_sources.push(SOURCE_AGENTS.to_string());
            }
        }

        if let Some(disk) = &self.disk {
            match self.check_disk(disk.as_ref(), now) {
                Ok(alert) => out.alerts.extend(alert),
                Err(e) => {
                    warn!(source = SOURCE_DISK, error = %e, "Disk check failed");
                    out.failed_sources.push(SOURCE_DISK.to_string());
                }
            }
        }

        if let Some(insights) = &self.insights {
            match self.check_cycles(insights.as_ref(), now) {
                Ok(alert) => out.alerts.extend(alert),
                Err(e) => record_provider_failure(&mut out, SOURCE_INSIGHTS, e),
            }
        }

        if let Some(tasks) = &self.tasks {
            match self.check_stale_tasks(tasks.as_ref(), now) {
                Ok(alerts) => out.alerts.extend(alerts),
                Err(e) => record_provider_failure(&mut out, SOURCE_TASKS, e),
            }
        }

        debug!(
            alerts = out.alerts.len(),
            failed = ?out.failed_sources,
            "Alert generation finished"
        );
        out
    }

    /// 返回 (告警, 是否所有 session 和 pane 都检查完成)
    fn check_agents(&self, now: DateTime<Utc>) -> Result<(Vec<Alert>, bool)> {
        let mut alerts = Vec::new();
        let mut complete = true;
        let stuck_after = try_minutes(self.config.agent_stuck_minutes)
            .with_context(|| format!("agent_stuck_minutes out of range: {}", self.config.agent_stuck_minutes))?;

        let sessions = self.panes.list_sessions()?;
        for session in sessions {
            if let Some(filter) = &self.config.session_filter {
                if &session.name != filter {
                    continue;
                }
            }

            let panes = match self.panes.panes(&session.name) {
                Ok(panes) => panes,
                Err(e) => {
                    warn!(session = %session.name, error = %e, "Failed to list panes");
                    complete = false;
                    continue;
                }
            };

            for pane in panes {
                match self.check_pane(&session.name, &pane, stuck_after, now) {
                    Ok(alert) => alerts.extend(alert),
                    Err(e) => {
                        // 检查不完整时保留该 pane 已有的告警
                        warn!(pane = %pane.id, error = %e, "Pane check incomplete");
                        complete = false;
                    }
                }
            }
        }

        Ok((alerts, complete))
    }

    /// 活动时间读取失败时返回错误，调用方据此把 agents 来源标记为失败
    fn check_pane(&self, session: &str, pane: &Pane, stuck_after: Duration, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let output = match self.panes.capture_output(&pane.id, self.config.scan_lines) {
            Ok(output) => output,
            Err(e) => {
                debug!(pane = %pane.id, error = %e, "Capture failed");
                // 抓不到输出本身就是 pane 失效的证据
                return Ok(Some(
                    Alert::for_pane(
                        AlertType::AgentCrashed,
                        Severity::Error,
                        session,
                        &pane.id,
                        format!("Cannot capture output from pane {} (may have crashed)", pane.id),
                        now,
                    )
                    .with_source(SOURCE_AGENTS),
                ));
            }
        };

        let hint = pane.agent_type.as_str();

        if let Some(hit) = self.classifier.detect_error(&output) {
            let (alert_type, severity) = match hit.category {
                ErrorCategory::RateLimit => (AlertType::RateLimit, Severity::Warning),
                ErrorCategory::Crash => (AlertType::AgentError, Severity::Critical),
                ErrorCategory::Connection => (AlertType::AgentError, Severity::Warning),
                _ => (AlertType::AgentError, Severity::Error),
            };
            return Ok(Some(
                Alert::for_pane(alert_type, severity, session, &pane.id, hit.category.message(), now)
                    .with_source(SOURCE_AGENTS)
                    .with_context("error_type", hit.category.as_str())
                    .with_context("pattern", hit.description)
                    .with_context("matched_line", truncate(&hit.line, MATCHED_LINE_MAX)),
            ));
        }

        if self.classifier.looks_exited(&output, hint) {
            return Ok(Some(
                Alert::for_pane(
                    AlertType::AgentCrashed,
                    Severity::Error,
                    session,
                    &pane.id,
                    format!("Agent in pane {} exited to a shell prompt", pane.id),
                    now,
                )
                .with_source(SOURCE_AGENTS)
                .with_context("agent_type", hint),
            ));
        }

        if pane.agent_type.is_known_agent() && !self.classifier.detect_idle(&output, hint) {
            let last_active = self
                .panes
                .pane_activity(&pane.id)
                .with_context(|| format!("failed to read activity of pane {}", pane.id))?;
            let silent = now - last_active;
            if silent >= stuck_after {
                return Ok(Some(
                    Alert::for_pane(
                        AlertType::AgentStuck,
                        Severity::Warning,
                        session,
                        &pane.id,
                        format!("No output from pane {} for {} minutes", pane.id, silent.num_minutes()),
                        now,
                    )
                    .with_source(SOURCE_AGENTS)
                    .with_context("last_active", last_active.to_rfc3339())
                    .with_context("minutes_silent", silent.num_minutes()),
                ));
            }
        }

        Ok(None)
    }

    fn check_disk(&self, disk: &dyn DiskProbe, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let path = self
            .config
            .projects_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/"));
        let space = disk.free_space(&path)?;
        let free_gb = space.free_gb();
        let threshold = self.config.disk_low_threshold_gb;

        if free_gb >= threshold {
            return Ok(None);
        }

        let severity = if free_gb < DISK_CRITICAL_GB {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let shown = space.path.display().to_string();

        Ok(Some(
            Alert::global(
                AlertType::DiskLow,
                severity,
                format!("Low disk space: {:.1} GB remaining on {}", free_gb, shown),
                now,
            )
            .with_source(SOURCE_DISK)
            .with_context("free_gb", free_gb)
            .with_context("threshold_gb", threshold)
            .with_context("path", shown),
        ))
    }

    fn check_cycles(&self, insights: &dyn InsightProvider, now: DateTime<Utc>) -> Result<Option<Alert>, ProviderError> {
        let insights = insights.insights(&self.project_dir())?;
        if insights.cycles.is_empty() {
            return Ok(None);
        }

        let cycles: Vec<String> = insights.cycles.iter().map(|c| c.nodes.join(" -> ")).collect();

        Ok(Some(
            Alert::global(
                AlertType::DependencyCycle,
                Severity::Error,
                format!("Dependency cycle detected: {} cycle(s) found", cycles.len()),
                now,
            )
            .with_source(SOURCE_INSIGHTS)
            .with_context("cycle_count", cycles.len())
            .with_context("cycles", cycles),
        ))
    }

    fn check_stale_tasks(&self, tasks: &dyn TaskProvider, now: DateTime<Utc>) -> Result<Vec<Alert>, ProviderError> {
        // 超出范围的阈值等同于永不过期
        let stale_after = try_hours(self.config.bead_stale_hours).unwrap_or(Duration::MAX);
        let in_progress = tasks.in_progress(&self.project_dir(), STALE_TASK_LIMIT)?;

        Ok(in_progress
            .into_iter()
            .filter(|task| now - task.updated_at > stale_after)
            .map(|task| {
                Alert::for_bead(
                    AlertType::BeadStale,
                    Severity::Warning,
                    &task.id,
                    format!(
                        "Bead {} has been in_progress for >{} hours without update",
                        task.id, self.config.bead_stale_hours
                    ),
                    now,
                )
                .with_source(SOURCE_TASKS)
                .with_context("title", task.title.clone())
                .with_context("assignee", task.assignee.clone())
                .with_context("last_updated", task.updated_at.to_rfc3339())
                .with_context("hours_since", (now - task.updated_at).num_hours())
            })
            .collect())
    }
}

fn record_provider_failure(out: &mut Generation, source: &str, err: ProviderError) {
    if err.is_not_installed() {
        debug!(source, error = %err, "Provider not installed, skipping");
        return;
    }
    warn!(source, error = %err, "Provider check failed");
    out.failed_sources.push(source.to_string());
}

/// 按字符截断，超长时以 "..." 结尾
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
