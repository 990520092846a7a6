//! 监控周期
//!
//! 每个周期做两件互不依赖的事：
//! - 告警：生成器产出候选告警，跟踪器合并
//! - 恢复：逐个 pane 抓取输出，检测到上下文压缩时发送恢复提示

use crate::alerts::{Alert, AlertGenerator, AlertTracker, DiskProbe};
use crate::clock::{try_minutes, Clock};
use crate::config::MonitorConfig;
use crate::providers::{InsightProvider, PaneProvider, TaskProvider};
use crate::status::{CompactionLog, OutputClassifier, RecoveryManager};
use anyhow::Result;
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 外部协作者
#[derive(Clone)]
pub struct Providers {
    pub panes: Arc<dyn PaneProvider>,
    pub disk: Option<Arc<dyn DiskProbe>>,
    pub insights: Option<Arc<dyn InsightProvider>>,
    pub tasks: Option<Arc<dyn TaskProvider>>,
}

impl Providers {
    pub fn new(panes: Arc<dyn PaneProvider>) -> Self {
        Self {
            panes,
            disk: None,
            insights: None,
            tasks: None,
        }
    }
}

/// 一个周期的结果
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub active: Vec<Alert>,
    /// 本周期转为已解决的告警
    pub newly_resolved: Vec<Alert>,
    pub failed_sources: Vec<String>,
    pub compactions: usize,
    pub recoveries_sent: usize,
}

pub struct Supervisor {
    generator: AlertGenerator,
    tracker: Arc<AlertTracker>,
    panes: Arc<dyn PaneProvider>,
    compactions: CompactionLog,
    recovery: Option<RecoveryManager>,
    scan_lines: usize,
    session_filter: Option<String>,
}

impl Supervisor {
    pub fn new(config: &MonitorConfig, providers: Providers, clock: Arc<dyn Clock>) -> Result<Self> {
        let classifier = OutputClassifier::with_ruleset(config.ruleset()?);

        let mut generator = AlertGenerator::new(config.alerts.clone(), providers.panes.clone(), clock.clone())
            .with_classifier(classifier);
        if let Some(disk) = providers.disk {
            generator = generator.with_disk_probe(disk);
        }
        if let Some(insights) = providers.insights {
            generator = generator.with_insights(insights);
        }

        let mut recovery = RecoveryManager::new(config.recovery.clone(), providers.panes.clone(), clock.clone());
        if let Some(tasks) = providers.tasks {
            generator = generator.with_tasks(tasks.clone());
            recovery = recovery.with_task_provider(tasks);
        }

        let tracker = AlertTracker::new(clock.clone())
            .with_prune_after(try_minutes(config.alerts.resolved_prune_minutes).unwrap_or(Duration::MAX));

        Ok(Self {
            generator,
            tracker: Arc::new(tracker),
            panes: providers.panes,
            compactions: CompactionLog::new(clock),
            recovery: Some(recovery),
            scan_lines: config.alerts.scan_lines,
            session_filter: config.alerts.session_filter.clone(),
        })
    }

    /// 只做告警，不发送恢复提示
    pub fn without_recovery(mut self) -> Self {
        self.recovery = None;
        self
    }

    pub fn tracker(&self) -> &Arc<AlertTracker> {
        &self.tracker
    }

    pub fn recovery(&self) -> Option<&RecoveryManager> {
        self.recovery.as_ref()
    }

    pub fn compactions(&self) -> &CompactionLog {
        &self.compactions
    }

    pub fn run_cycle(&self) -> CycleReport {
        let before: HashSet<String> = self.tracker.active().into_iter().map(|a| a.id).collect();

        let generation = self.generator.generate_all();
        self.tracker.update(generation.alerts, &generation.failed_sources);

        let active = self.tracker.active();
        let still_active: HashSet<&str> = active.iter().map(|a| a.id.as_str()).collect();
        let newly_resolved = before
            .iter()
            .filter(|id| !still_active.contains(id.as_str()))
            .filter_map(|id| self.tracker.by_id(id))
            .collect();

        let (compactions, recoveries_sent) = match &self.recovery {
            Some(recovery) => self.recover_compacted(recovery),
            None => (0, 0),
        };

        let report = CycleReport {
            active,
            newly_resolved,
            failed_sources: generation.failed_sources,
            compactions,
            recoveries_sent,
        };
        info!(
            active = report.active.len(),
            resolved = report.newly_resolved.len(),
            failed = ?report.failed_sources,
            compactions = report.compactions,
            recoveries = report.recoveries_sent,
            "Cycle complete"
        );
        report
    }

    fn recover_compacted(&self, recovery: &RecoveryManager) -> (usize, usize) {
        let mut compactions = 0;
        let mut sent = 0;

        let sessions = match self.panes.list_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Failed to list sessions for recovery");
                return (0, 0);
            }
        };

        for session in sessions {
            if self.session_filter.as_ref().is_some_and(|f| f != &session.name) {
                continue;
            }
            let panes = match self.panes.panes(&session.name) {
                Ok(panes) => panes,
                Err(e) => {
                    warn!(session = %session.name, error = %e, "Failed to list panes for recovery");
                    continue;
                }
            };

            for pane in panes {
                // 抓取失败由告警路径负责
                let Ok(output) = self.panes.capture_output(&pane.id, self.scan_lines) else {
                    continue;
                };
                let Some(event) = self.compactions.check(&output, pane.agent_type, &pane.id) else {
                    continue;
                };
                compactions += 1;
                debug!(pane = %pane.id, pattern = %event.pattern_id, "Compaction detected");

                match recovery.handle_compaction_event(&event, &session.name, pane.index) {
                    Ok(outcome) if outcome.was_sent() => sent += 1,
                    Ok(_) => {}
                    Err(e) => warn!(pane = %pane.id, error = %e, "Recovery failed"),
                }
            }
        }

        (compactions, sent)
    }
}
