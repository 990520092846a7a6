//! 告警生命周期
//!
//! 每个周期调用一次 [`AlertTracker::update`]：
//! 1. 已活跃的 ID 原地刷新（`last_seen_at`、`count`、严重度只升不降）
//! 2. 本周期未出现的活跃告警转入已解决，除非其来源探测本周期失败
//! 3. 已解决超过 `prune_after` 的告警永久删除

use super::types::{Alert, AlertSummary, AlertType, Severity};
use crate::clock::{cutoff, Clock};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// 默认保留已解决告警 1 小时
pub const DEFAULT_PRUNE_AFTER_MINUTES: i64 = 60;

#[derive(Default)]
struct TrackerState {
    active: HashMap<String, Alert>,
    resolved: Vec<Alert>,
}

/// 某一时刻的跟踪器视图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerSnapshot {
    pub active: Vec<Alert>,
    pub resolved: Vec<Alert>,
    pub summary: AlertSummary,
}

/// 告警跟踪器
pub struct AlertTracker {
    state: RwLock<TrackerState>,
    prune_after: RwLock<Duration>,
    clock: Arc<dyn Clock>,
}

impl AlertTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            prune_after: RwLock::new(Duration::minutes(DEFAULT_PRUNE_AFTER_MINUTES)),
            clock,
        }
    }

    pub fn with_prune_after(self, prune_after: Duration) -> Self {
        self.set_prune_after(prune_after);
        self
    }

    pub fn set_prune_after(&self, prune_after: Duration) {
        *self.prune_after.write().unwrap_or_else(PoisonError::into_inner) = prune_after;
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 合并本周期检测结果
    pub fn update(&self, detected: Vec<Alert>, failed_sources: &[String]) {
        let now = self.clock.now();
        let prune_after = *self.prune_after.read().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.write();

        let mut seen = HashSet::with_capacity(detected.len());
        for incoming in detected {
            seen.insert(incoming.id.clone());
            refresh_or_insert(&mut state, incoming, now);
        }

        // 来源失败的告警保持原样，避免探测故障造成告警"消失"
        let vanished: Vec<String> = state
            .active
            .iter()
            .filter(|(id, alert)| !seen.contains(*id) && !failed_sources.iter().any(|s| *s == alert.source))
            .map(|(id, _)| id.clone())
            .collect();

        for id in vanished {
            if let Some(mut alert) = state.active.remove(&id) {
                alert.resolved_at = Some(now);
                info!(id = %alert.id, alert_type = %alert.alert_type, "Alert resolved");
                state.resolved.push(alert);
            }
        }

        let keep_after = cutoff(now, prune_after);
        let before = state.resolved.len();
        state
            .resolved
            .retain(|alert| alert.resolved_at.is_some_and(|at| at > keep_after));
        let pruned = before - state.resolved.len();
        if pruned > 0 {
            debug!(pruned, "Pruned resolved alerts");
        }
    }

    /// 活跃告警，严重度降序、创建时间升序
    pub fn active(&self) -> Vec<Alert> {
        sorted_active(&self.read())
    }

    /// 按类型和最低严重度过滤活跃告警
    pub fn active_filtered(&self, alert_type: Option<AlertType>, min_severity: Option<Severity>) -> Vec<Alert> {
        self.active()
            .into_iter()
            .filter(|a| alert_type.map_or(true, |t| a.alert_type == t))
            .filter(|a| min_severity.map_or(true, |s| a.severity.rank() >= s.rank()))
            .collect()
    }

    pub fn resolved(&self) -> Vec<Alert> {
        self.read().resolved.clone()
    }

    /// 活跃在前，已解决在后
    pub fn all(&self) -> Vec<Alert> {
        let mut alerts = self.active();
        alerts.extend(self.resolved());
        alerts
    }

    /// 先查活跃，再查已解决
    pub fn by_id(&self, id: &str) -> Option<Alert> {
        let state = self.read();
        state
            .active
            .get(id)
            .or_else(|| state.resolved.iter().find(|a| a.id == id))
            .cloned()
    }

    pub fn summary(&self) -> AlertSummary {
        summarize(&self.read())
    }

    /// 在同一把读锁下取活跃、已解决与统计，三者互相一致
    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.read();
        TrackerSnapshot {
            active: sorted_active(&state),
            resolved: state.resolved.clone(),
            summary: summarize(&state),
        }
    }

    /// 人工解决；ID 不在活跃集合中时返回 false
    pub fn manual_resolve(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.write();
        match state.active.remove(id) {
            Some(mut alert) => {
                alert.resolved_at = Some(now);
                info!(id, "Alert manually resolved");
                state.resolved.push(alert);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.active.clear();
        state.resolved.clear();
    }
}

fn refresh_or_insert(state: &mut TrackerState, incoming: Alert, now: DateTime<Utc>) {
    if let Some(existing) = state.active.get_mut(&incoming.id) {
        existing.last_seen_at = now;
        existing.count += 1;
        if incoming.severity.rank() > existing.severity.rank() {
            info!(
                id = %existing.id,
                from = %existing.severity,
                to = %incoming.severity,
                "Alert escalated"
            );
            existing.severity = incoming.severity;
        }
        existing.message = incoming.message;
        if !incoming.context.is_empty() {
            existing.context = incoming.context;
        }
        return;
    }

    // 解决后再次出现：丢弃旧的已解决副本，生成新实例
    state.resolved.retain(|a| a.id != incoming.id);

    let mut alert = incoming;
    alert.created_at = now;
    alert.last_seen_at = now;
    alert.count = 1;
    alert.resolved_at = None;
    debug!(id = %alert.id, alert_type = %alert.alert_type, severity = %alert.severity, "New alert");
    state.active.insert(alert.id.clone(), alert);
}

fn sorted_active(state: &TrackerState) -> Vec<Alert> {
    let mut alerts: Vec<Alert> = state.active.values().cloned().collect();
    sort_alerts(&mut alerts);
    alerts
}

fn summarize(state: &TrackerState) -> AlertSummary {
    let mut summary = AlertSummary {
        total_active: state.active.len(),
        total_resolved: state.resolved.len(),
        ..Default::default()
    };
    for alert in state.active.values() {
        *summary
            .by_severity
            .entry(alert.severity.as_str().to_string())
            .or_default() += 1;
        *summary
            .by_type
            .entry(alert.alert_type.as_str().to_string())
            .or_default() += 1;
    }
    summary
}

fn sort_alerts(alerts: &mut [Alert]) {
    alerts.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
