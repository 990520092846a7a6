//! 压缩恢复管理
//!
//! 检测到上下文压缩后，向对应 pane 发送恢复提示，让 agent 重新读取项目约定。
//! 每个 pane 有冷却时间和最大次数限制：
//!
//! ```text
//! Eligible --发送--> CoolingDown --冷却结束--> Eligible
//! Eligible --次数达到上限--> Exhausted --reset--> Eligible
//! ```
//!
//! 闸门检查和发送在同一把写锁内完成，并发调用不会越过冷却或次数限制。

use super::compaction::CompactionEvent;
use super::context::{build_recovery_prompt, ProjectContext};
use crate::clock::{cutoff, try_seconds, Clock};
use crate::providers::{PaneProvider, TaskProvider};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// 默认恢复提示
pub const DEFAULT_RECOVERY_PROMPT: &str = "Reread AGENTS.md so it's still fresh in your mind. Use ultrathink.";

/// 发送失败时如何处理已消耗的次数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedSendPolicy {
    /// 失败也计入次数并开始冷却
    #[default]
    ConsumeAttempt,
    /// 失败不计入，下个周期可以立即重试
    PreserveAttempt,
}

/// 恢复配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 同一 pane 两次恢复的最小间隔（秒）
    pub cooldown_secs: u64,
    pub prompt: String,
    /// 每个 pane 的最大恢复次数
    pub max_recoveries: u32,
    /// 恢复事件保留时长（秒）
    pub max_event_age_secs: u64,
    /// 是否附加项目上下文
    pub include_project_context: bool,
    /// 项目目录，默认当前目录
    pub project_dir: Option<PathBuf>,
    pub failed_send_policy: FailedSendPolicy,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 30,
            prompt: DEFAULT_RECOVERY_PROMPT.to_string(),
            max_recoveries: 5,
            max_event_age_secs: 600,
            include_project_context: true,
            project_dir: None,
            failed_send_policy: FailedSendPolicy::ConsumeAttempt,
        }
    }
}

/// 一次已发送的恢复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    /// "<session>:<index>"
    pub pane_key: String,
    pub session: String,
    pub pane_index: u32,
    pub sent_at: DateTime<Utc>,
    /// 基础提示（不含项目上下文）
    pub prompt: String,
    /// 触发恢复的压缩文本
    pub trigger_text: String,
}

/// 闸门拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRefusal {
    Cooldown { remaining: Duration },
    Exhausted { attempts: u32, max: u32 },
}

impl fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRefusal::Cooldown { remaining } => {
                write!(f, "cooldown: {}s remaining", remaining.num_seconds().max(1))
            }
            GateRefusal::Exhausted { attempts, max } => {
                write!(f, "max recoveries reached: {}/{}", attempts, max)
            }
        }
    }
}

/// 发送结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Sent,
    /// 被闸门拦下，不是错误
    Skipped(GateRefusal),
}

impl RecoveryOutcome {
    pub fn was_sent(&self) -> bool {
        matches!(self, RecoveryOutcome::Sent)
    }
}

/// pane 的恢复状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneRecoveryState {
    Eligible,
    CoolingDown { remaining: Duration },
    Exhausted,
}

#[derive(Debug, Default)]
struct RecoveryState {
    last_recovery: HashMap<String, DateTime<Utc>>,
    attempts: HashMap<String, u32>,
    events: Vec<RecoveryEvent>,
}

struct Tunables {
    cooldown: Duration,
    prompt: String,
}

/// 恢复管理器
pub struct RecoveryManager {
    state: RwLock<RecoveryState>,
    tunables: RwLock<Tunables>,
    max_recoveries: u32,
    max_event_age: Duration,
    include_context: bool,
    project_dir: PathBuf,
    policy: FailedSendPolicy,
    panes: Arc<dyn PaneProvider>,
    tasks: Option<Arc<dyn TaskProvider>>,
    clock: Arc<dyn Clock>,
}

/// "<session>:<index>"
pub fn pane_key(session: &str, pane_index: u32) -> String {
    format!("{}:{}", session, pane_index)
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig, panes: Arc<dyn PaneProvider>, clock: Arc<dyn Clock>) -> Self {
        let prompt = if config.prompt.trim().is_empty() {
            DEFAULT_RECOVERY_PROMPT.to_string()
        } else {
            config.prompt
        };

        Self {
            state: RwLock::new(RecoveryState::default()),
            tunables: RwLock::new(Tunables {
                cooldown: try_seconds(config.cooldown_secs).unwrap_or(Duration::MAX),
                prompt,
            }),
            max_recoveries: config.max_recoveries,
            max_event_age: try_seconds(config.max_event_age_secs).unwrap_or(Duration::MAX),
            include_context: config.include_project_context,
            project_dir: config.project_dir.unwrap_or_else(|| PathBuf::from(".")),
            policy: config.failed_send_policy,
            panes,
            tasks: None,
            clock,
        }
    }

    /// 设置项目上下文来源
    pub fn with_task_provider(mut self, tasks: Arc<dyn TaskProvider>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RecoveryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RecoveryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cooldown(&self) -> Duration {
        self.tunables.read().unwrap_or_else(PoisonError::into_inner).cooldown
    }

    fn base_prompt(&self) -> String {
        self.tunables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .prompt
            .clone()
    }

    fn gate(&self, state: &RecoveryState, key: &str, now: DateTime<Utc>) -> Result<(), GateRefusal> {
        if let Some(last) = state.last_recovery.get(key) {
            let until = last
                .checked_add_signed(self.cooldown())
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let remaining = until - now;
            if remaining > Duration::zero() {
                return Err(GateRefusal::Cooldown { remaining });
            }
        }

        let attempts = state.attempts.get(key).copied().unwrap_or(0);
        if attempts >= self.max_recoveries {
            return Err(GateRefusal::Exhausted {
                attempts,
                max: self.max_recoveries,
            });
        }

        Ok(())
    }

    /// 是否可以发送（仅供参考，[`send`](Self::send) 会在锁内重新检查）
    pub fn can_send(&self, key: &str) -> Result<(), GateRefusal> {
        let now = self.clock.now();
        self.gate(&self.read_state(), key, now)
    }

    /// pane 当前所处状态
    pub fn pane_state(&self, key: &str) -> PaneRecoveryState {
        match self.can_send(key) {
            Ok(()) => PaneRecoveryState::Eligible,
            Err(GateRefusal::Cooldown { remaining }) => PaneRecoveryState::CoolingDown { remaining },
            Err(GateRefusal::Exhausted { .. }) => PaneRecoveryState::Exhausted,
        }
    }

    /// 发送恢复提示
    ///
    /// 被冷却或次数限制拦下时返回 `Ok(Skipped)`；注入按键失败时返回错误。
    pub fn send(&self, session: &str, pane_index: u32, key: &str, trigger_text: &str) -> Result<RecoveryOutcome> {
        // 提前拦截，避免无谓地拉取项目上下文
        if let Err(refusal) = self.can_send(key) {
            debug!(pane = %key, reason = %refusal, "Recovery skipped");
            return Ok(RecoveryOutcome::Skipped(refusal));
        }

        let base = self.base_prompt();
        let context = if self.include_context {
            self.tasks
                .as_deref()
                .and_then(|tasks| ProjectContext::fetch(tasks, &self.project_dir))
        } else {
            None
        };
        let prompt = build_recovery_prompt(&base, context.as_ref());
        let target = pane_key(session, pane_index);

        let mut state = self.write_state();
        let now = self.clock.now();

        // 持锁重新检查
        if let Err(refusal) = self.gate(&state, key, now) {
            debug!(pane = %key, reason = %refusal, "Recovery skipped after recheck");
            return Ok(RecoveryOutcome::Skipped(refusal));
        }

        let sent = self.panes.send_keys(&target, &prompt, true);

        if let Err(e) = sent {
            warn!(pane = %key, error = %e, "Failed to send recovery prompt");
            if self.policy == FailedSendPolicy::ConsumeAttempt {
                state.last_recovery.insert(key.to_string(), now);
                *state.attempts.entry(key.to_string()).or_insert(0) += 1;
            }
            return Err(e).with_context(|| format!("failed to send recovery prompt to {}", target));
        }

        state.last_recovery.insert(key.to_string(), now);
        let attempts = {
            let count = state.attempts.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        state.events.push(RecoveryEvent {
            pane_key: key.to_string(),
            session: session.to_string(),
            pane_index,
            sent_at: now,
            prompt: base,
            trigger_text: trigger_text.to_string(),
        });
        Self::prune_events(&mut state, cutoff(now, self.max_event_age));

        info!(pane = %key, attempts, max = self.max_recoveries, "Recovery prompt sent");
        Ok(RecoveryOutcome::Sent)
    }

    /// 处理压缩事件：pane key 由 session 和 index 生成
    pub fn handle_compaction_event(
        &self,
        event: &CompactionEvent,
        session: &str,
        pane_index: u32,
    ) -> Result<RecoveryOutcome> {
        let key = pane_key(session, pane_index);
        self.send(session, pane_index, &key, &event.matched_text)
    }

    /// 最近的恢复事件（读取前清理过期事件）
    pub fn events(&self) -> Vec<RecoveryEvent> {
        let mut state = self.write_state();
        Self::prune_events(&mut state, cutoff(self.clock.now(), self.max_event_age));
        state.events.clone()
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.read_state().attempts.get(key).copied().unwrap_or(0)
    }

    pub fn last_recovery(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read_state().last_recovery.get(key).copied()
    }

    /// 清除单个 pane 的冷却和次数（例如人工介入之后）
    pub fn reset(&self, key: &str) {
        let mut state = self.write_state();
        state.last_recovery.remove(key);
        state.attempts.remove(key);
        debug!(pane = %key, "Recovery state reset");
    }

    /// 清除全部状态和事件
    pub fn reset_all(&self) {
        *self.write_state() = RecoveryState::default();
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.tunables.write().unwrap_or_else(PoisonError::into_inner).prompt = prompt.into();
    }

    pub fn set_cooldown(&self, cooldown: Duration) {
        self.tunables.write().unwrap_or_else(PoisonError::into_inner).cooldown = cooldown;
    }

    fn prune_events(state: &mut RecoveryState, since: DateTime<Utc>) {
        state.events.retain(|e| e.sent_at > since);
    }
}
