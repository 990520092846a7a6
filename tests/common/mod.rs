//! 集成测试共用的内存实现

#![allow(dead_code)]

use agent_fleet_monitor::alerts::{DiskProbe, DiskSpace};
use agent_fleet_monitor::providers::{
    Cycle, DependencyContext, HealthSummary, InProgressTask, InsightProvider, Insights, NodeScore, Pane,
    PaneProvider, Recommendation, Session, TaskProvider,
};
use agent_fleet_monitor::status::AgentType;
use agent_fleet_monitor::ProviderError;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// 内存中的 tmux
#[derive(Default)]
pub struct FakePanes {
    sessions: Mutex<Vec<String>>,
    panes: Mutex<HashMap<String, Vec<Pane>>>,
    /// 没有条目的 pane 抓取失败
    output: Mutex<HashMap<String, String>>,
    activity: Mutex<HashMap<String, DateTime<Utc>>>,
    sent: Mutex<Vec<(String, String)>>,
    fail_listing: AtomicBool,
    fail_sends: AtomicBool,
}

impl FakePanes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pane(&self, session: &str, id: &str, index: u32, agent: AgentType, output: &str, active_at: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.iter().any(|s| s == session) {
            sessions.push(session.to_string());
        }
        let title = format!("{}__{}_{}", session, agent.as_str(), index);
        self.panes
            .lock()
            .unwrap()
            .entry(session.to_string())
            .or_default()
            .push(Pane::new(id, index, title, agent));
        self.set_output(id, output);
        self.activity.lock().unwrap().insert(id.to_string(), active_at);
    }

    pub fn set_output(&self, id: &str, output: &str) {
        self.output.lock().unwrap().insert(id.to_string(), output.to_string());
    }

    /// 之后抓取该 pane 会失败
    pub fn break_capture(&self, id: &str) {
        self.output.lock().unwrap().remove(id);
    }

    pub fn set_activity(&self, id: &str, at: DateTime<Utc>) {
        self.activity.lock().unwrap().insert(id.to_string(), at);
    }

    /// 之后读取该 pane 的活动时间会失败
    pub fn break_activity(&self, id: &str) {
        self.activity.lock().unwrap().remove(id);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// (target, text)
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl PaneProvider for FakePanes {
    fn list_sessions(&self) -> Result<Vec<Session>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("tmux server unavailable"));
        }
        Ok(self.sessions.lock().unwrap().iter().map(Session::named).collect())
    }

    fn panes(&self, session: &str) -> Result<Vec<Pane>> {
        Ok(self.panes.lock().unwrap().get(session).cloned().unwrap_or_default())
    }

    fn capture_output(&self, pane_id: &str, _max_lines: usize) -> Result<String> {
        self.output
            .lock()
            .unwrap()
            .get(pane_id)
            .cloned()
            .ok_or_else(|| anyhow!("can't find pane: {}", pane_id))
    }

    fn pane_activity(&self, pane_id: &str) -> Result<DateTime<Utc>> {
        self.activity
            .lock()
            .unwrap()
            .get(pane_id)
            .copied()
            .ok_or_else(|| anyhow!("no activity for {}", pane_id))
    }

    fn send_keys(&self, target: &str, text: &str, _submit: bool) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("send-keys failed"));
        }
        self.sent.lock().unwrap().push((target.to_string(), text.to_string()));
        Ok(())
    }
}

/// 固定剩余空间的磁盘
pub struct FakeDisk {
    free_gb: Mutex<f64>,
    fail: AtomicBool,
}

impl FakeDisk {
    pub fn with_free_gb(free_gb: f64) -> Self {
        Self {
            free_gb: Mutex::new(free_gb),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_free_gb(&self, free_gb: f64) {
        *self.free_gb.lock().unwrap() = free_gb;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl DiskProbe for FakeDisk {
    fn free_space(&self, path: &Path) -> Result<DiskSpace> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("statfs failed"));
        }
        let gb = *self.free_gb.lock().unwrap();
        Ok(DiskSpace {
            path: PathBuf::from(path),
            free_bytes: (gb * 1024.0 * 1024.0 * 1024.0) as u64,
        })
    }
}

/// 外部工具的表现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    Ok,
    NotInstalled,
    Broken,
}

fn tool_error(mode: ToolMode, tool: &'static str) -> Option<ProviderError> {
    match mode {
        ToolMode::Ok => None,
        ToolMode::NotInstalled => Some(ProviderError::NotInstalled { tool }),
        ToolMode::Broken => Some(ProviderError::CommandFailed {
            tool,
            args: "--json".to_string(),
            stderr: "database locked".to_string(),
        }),
    }
}

/// bv 替身
pub struct FakeInsights {
    pub mode: Mutex<ToolMode>,
    pub cycles: Mutex<Vec<Vec<String>>>,
}

impl FakeInsights {
    pub fn new(mode: ToolMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            cycles: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: ToolMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn add_cycle(&self, nodes: &[&str]) {
        self.cycles
            .lock()
            .unwrap()
            .push(nodes.iter().map(|n| n.to_string()).collect());
    }
}

impl InsightProvider for FakeInsights {
    fn insights(&self, _dir: &Path) -> Result<Insights, ProviderError> {
        if let Some(err) = tool_error(*self.mode.lock().unwrap(), "bv") {
            return Err(err);
        }
        Ok(Insights {
            bottlenecks: vec![NodeScore {
                id: "bd-7".to_string(),
                value: 0.8,
            }],
            cycles: self
                .cycles
                .lock()
                .unwrap()
                .iter()
                .map(|nodes| Cycle { nodes: nodes.clone() })
                .collect(),
        })
    }
}

/// bd 替身
pub struct FakeTasks {
    pub mode: Mutex<ToolMode>,
    pub in_progress: Mutex<Vec<InProgressTask>>,
}

impl FakeTasks {
    pub fn new(mode: ToolMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            in_progress: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: ToolMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn add_task(&self, id: &str, title: &str, updated_at: DateTime<Utc>) {
        self.in_progress.lock().unwrap().push(InProgressTask {
            id: id.to_string(),
            title: title.to_string(),
            assignee: "cc_1".to_string(),
            updated_at,
        });
    }

    fn check(&self) -> Result<(), ProviderError> {
        match tool_error(*self.mode.lock().unwrap(), "bd") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl TaskProvider for FakeTasks {
    fn in_progress(&self, _dir: &Path, limit: usize) -> Result<Vec<InProgressTask>, ProviderError> {
        self.check()?;
        Ok(self.in_progress.lock().unwrap().iter().take(limit).cloned().collect())
    }

    fn top_bottlenecks(&self, _dir: &Path, _limit: usize) -> Result<Vec<NodeScore>, ProviderError> {
        self.check()?;
        Ok(Vec::new())
    }

    /// 进行中的任务直接当作推荐动作
    fn next_actions(&self, _dir: &Path, limit: usize) -> Result<Vec<Recommendation>, ProviderError> {
        self.check()?;
        Ok(self
            .in_progress
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .map(|t| Recommendation {
                id: t.id.clone(),
                title: t.title.clone(),
            })
            .collect())
    }

    fn health_summary(&self, _dir: &Path) -> Result<HealthSummary, ProviderError> {
        Err(ProviderError::NotInstalled { tool: "bv" })
    }

    fn dependency_context(&self, _dir: &Path, _limit: usize) -> Result<DependencyContext, ProviderError> {
        self.check()?;
        Ok(DependencyContext::default())
    }
}
