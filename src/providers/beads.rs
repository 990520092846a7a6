//! beads 工具集成
//!
//! `bv`（依赖图分析，robot 模式输出 JSON）和 `bd`（任务跟踪）都作为外部进程调用。
//! 是否安装只用 `which` 探测一次并缓存；未安装时返回 [`ProviderError::NotInstalled`]。

use super::{
    ActiveTask, BlockedTask, DependencyContext, DriftStatus, HealthSummary, InProgressTask, InsightProvider,
    Insights, NodeScore, Recommendation, TaskProvider,
};
use crate::error::{ProviderError, ProviderResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::debug;

const BV: &str = "bv";
const BD: &str = "bd";

/// bv / bd 命令行封装
#[derive(Default)]
pub struct BeadsCli {
    bv_installed: OnceLock<bool>,
    bd_installed: OnceLock<bool>,
    /// bd 提示没有数据库时，后续调用统一加 --no-db
    bd_no_db: AtomicBool,
}

#[derive(Deserialize)]
struct PriorityResponse {
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

#[derive(Deserialize)]
struct BdStats {
    #[serde(default)]
    blocked_issues: usize,
    #[serde(default)]
    ready_issues: usize,
}

#[derive(Deserialize)]
struct BdIssue {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl BeadsCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bv_installed(&self) -> bool {
        *self.bv_installed.get_or_init(|| which::which(BV).is_ok())
    }

    pub fn bd_installed(&self) -> bool {
        *self.bd_installed.get_or_init(|| which::which(BD).is_ok())
    }

    fn run_bv(&self, dir: &Path, args: &[&str]) -> ProviderResult<String> {
        if !self.bv_installed() {
            return Err(ProviderError::NotInstalled { tool: BV });
        }
        run_tool(BV, dir, args)
    }

    fn run_bd(&self, dir: &Path, args: &[&str]) -> ProviderResult<String> {
        if !self.bd_installed() {
            return Err(ProviderError::NotInstalled { tool: BD });
        }

        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if self.bd_no_db.load(Ordering::Relaxed) {
            full.push("--no-db");
        }
        full.extend_from_slice(args);

        match run_tool(BD, dir, &full) {
            Err(ProviderError::CommandFailed { ref stderr, .. })
                if !self.bd_no_db.load(Ordering::Relaxed) && is_no_database(stderr) =>
            {
                debug!("bd has no database, retrying with --no-db");
                self.bd_no_db.store(true, Ordering::Relaxed);
                self.run_bd(dir, args)
            }
            other => other,
        }
    }

    fn bv_json<T: DeserializeOwned>(&self, dir: &Path, flag: &str) -> ProviderResult<T> {
        let output = self.run_bv(dir, &[flag])?;
        serde_json::from_str(&output).map_err(|source| ProviderError::Parse { tool: BV, source })
    }

    fn bd_json<T: DeserializeOwned>(&self, dir: &Path, args: &[&str]) -> ProviderResult<T> {
        let output = self.run_bd(dir, args)?;
        serde_json::from_str(&output).map_err(|source| ProviderError::Parse { tool: BD, source })
    }

    /// 检查相对基线的漂移（退出码 0 正常、1 严重、2 警告）
    pub fn check_drift(&self, dir: &Path) -> HealthSummary {
        if !self.bv_installed() {
            return HealthSummary {
                drift: DriftStatus::NoBaseline,
                drift_message: "bv not installed".to_string(),
            };
        }
        if !dir.join(".beads").is_dir() {
            return HealthSummary {
                drift: DriftStatus::NoBaseline,
                drift_message: format!("no .beads directory in {}", dir.display()),
            };
        }

        let output = match Command::new(BV).arg("-check-drift").current_dir(dir).output() {
            Ok(output) => output,
            Err(e) => {
                return HealthSummary {
                    drift: DriftStatus::NoBaseline,
                    drift_message: e.to_string(),
                }
            }
        };

        let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if message.is_empty() {
            message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        }

        let drift = match output.status.code() {
            Some(0) => DriftStatus::Ok,
            Some(1) if message.contains("No baseline") => DriftStatus::NoBaseline,
            Some(1) => DriftStatus::Critical,
            Some(2) => DriftStatus::Warning,
            _ => DriftStatus::NoBaseline,
        };

        HealthSummary {
            drift,
            drift_message: message,
        }
    }
}

impl InsightProvider for BeadsCli {
    fn insights(&self, dir: &Path) -> ProviderResult<Insights> {
        self.bv_json(dir, "-robot-insights")
    }
}

impl TaskProvider for BeadsCli {
    fn in_progress(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<InProgressTask>> {
        let issues: Vec<BdIssue> = self.bd_json(dir, &["list", "--status=in_progress", "--json"])?;
        Ok(issues
            .into_iter()
            .filter_map(|issue| {
                Some(InProgressTask {
                    updated_at: issue.updated_at?,
                    id: issue.id,
                    title: issue.title,
                    assignee: issue.assignee.unwrap_or_default(),
                })
            })
            .take(limit)
            .collect())
    }

    fn top_bottlenecks(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<NodeScore>> {
        let mut bottlenecks = self.insights(dir)?.bottlenecks;
        bottlenecks.truncate(limit);
        Ok(bottlenecks)
    }

    fn next_actions(&self, dir: &Path, limit: usize) -> ProviderResult<Vec<Recommendation>> {
        let mut recs = self.bv_json::<PriorityResponse>(dir, "-robot-priority")?.recommendations;
        recs.truncate(limit);
        Ok(recs)
    }

    fn health_summary(&self, dir: &Path) -> ProviderResult<HealthSummary> {
        if !self.bv_installed() {
            return Err(ProviderError::NotInstalled { tool: BV });
        }
        Ok(self.check_drift(dir))
    }

    /// 三个 bd 查询各自独立，单个失败只留空对应字段
    fn dependency_context(&self, dir: &Path, limit: usize) -> ProviderResult<DependencyContext> {
        if !self.bd_installed() {
            return Err(ProviderError::NotInstalled { tool: BD });
        }

        let mut ctx = DependencyContext::default();

        if let Ok(stats) = self.bd_json::<BdStats>(dir, &["stats", "--json"]) {
            ctx.blocked_count = stats.blocked_issues;
            ctx.ready_count = stats.ready_issues;
        }

        if let Ok(issues) = self.bd_json::<Vec<BdIssue>>(dir, &["list", "--status=in_progress", "--json"]) {
            ctx.in_progress = issues
                .into_iter()
                .take(limit)
                .map(|i| ActiveTask { id: i.id, title: i.title })
                .collect();
        }

        if let Ok(blocked) = self.bd_json::<Vec<BlockedTask>>(dir, &["blocked", "--json"]) {
            ctx.top_blockers = blocked.into_iter().take(limit).collect();
        }

        Ok(ctx)
    }
}

fn run_tool(tool: &'static str, dir: &Path, args: &[&str]) -> ProviderResult<String> {
    let output = Command::new(tool)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|source| ProviderError::Io { tool, source })?;

    if !output.status.success() {
        return Err(ProviderError::CommandFailed {
            tool,
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn is_no_database(stderr: &str) -> bool {
    let s = stderr.to_lowercase();
    s.contains("no beads database found") || s.contains("use 'bd --no-db'")
}
