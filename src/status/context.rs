//! 恢复提示中的项目上下文
//!
//! 从任务跟踪工具拉取瓶颈、推荐动作、健康度和依赖摘要，渲染成 markdown 追加到恢复提示后面。
//! 每一项都是可选的，拉取失败只会让对应段落缺失。

use crate::providers::TaskProvider;
use std::fmt::Write;
use std::path::Path;
use tracing::debug;

const TOP_BOTTLENECKS: usize = 3;
const NEXT_ACTIONS: usize = 3;
const DEPENDENCY_ITEMS: usize = 5;

/// 项目上下文
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectContext {
    pub top_bottlenecks: Vec<String>,
    /// "[id] title"
    pub next_actions: Vec<String>,
    pub health_status: Option<String>,
    pub has_drift: bool,
    pub in_progress: Vec<String>,
    pub blocked_count: usize,
    pub ready_count: usize,
    /// "[id] title (blocked by: a, b)"
    pub top_blockers: Vec<String>,
}

impl ProjectContext {
    /// 拉取上下文；所有查询都失败时返回 None
    pub fn fetch(tasks: &dyn TaskProvider, dir: &Path) -> Option<Self> {
        let mut ctx = ProjectContext::default();
        let mut any = false;

        match tasks.top_bottlenecks(dir, TOP_BOTTLENECKS) {
            Ok(bottlenecks) => {
                any = true;
                ctx.top_bottlenecks = bottlenecks.into_iter().map(|b| b.id).collect();
            }
            Err(e) => debug!(error = %e, "Skipping bottlenecks in recovery context"),
        }

        match tasks.next_actions(dir, NEXT_ACTIONS) {
            Ok(actions) => {
                any = true;
                ctx.next_actions = actions
                    .into_iter()
                    .map(|a| format!("[{}] {}", a.id, a.title))
                    .collect();
            }
            Err(e) => debug!(error = %e, "Skipping next actions in recovery context"),
        }

        match tasks.health_summary(dir) {
            Ok(health) => {
                any = true;
                ctx.health_status = Some(health.drift.to_string());
                ctx.has_drift = health.drift.has_drift();
            }
            Err(e) => debug!(error = %e, "Skipping health summary in recovery context"),
        }

        match tasks.dependency_context(dir, DEPENDENCY_ITEMS) {
            Ok(deps) => {
                any = true;
                ctx.blocked_count = deps.blocked_count;
                ctx.ready_count = deps.ready_count;
                ctx.in_progress = deps
                    .in_progress
                    .into_iter()
                    .map(|t| format!("[{}] {}", t.id, t.title))
                    .collect();
                ctx.top_blockers = deps
                    .top_blockers
                    .into_iter()
                    .map(|b| {
                        if b.blocked_by.is_empty() {
                            format!("[{}] {}", b.id, b.title)
                        } else {
                            format!("[{}] {} (blocked by: {})", b.id, b.title, b.blocked_by.join(", "))
                        }
                    })
                    .collect();
            }
            Err(e) => debug!(error = %e, "Skipping dependency context in recovery context"),
        }

        any.then_some(ctx)
    }

    /// 渲染为 markdown 段落
    pub fn render(&self) -> String {
        let mut out = String::from("\n\n# Project Context from Beads\n");

        if !self.top_bottlenecks.is_empty() {
            out.push_str("\n## Current Bottlenecks (resolve these to unblock progress):\n");
            for b in &self.top_bottlenecks {
                let _ = writeln!(out, "- {}", b);
            }
        }

        if !self.next_actions.is_empty() {
            out.push_str("\n## Recommended Next Actions:\n");
            for a in &self.next_actions {
                let _ = writeln!(out, "- {}", a);
            }
        }

        if let Some(health) = &self.health_status {
            let _ = writeln!(out, "\n## Project Health: {}", health);
        }

        if self.has_drift {
            out.push_str("\n**Warning**: Project has drifted from baseline. Consider running `bv` to review.\n");
        }

        if !self.in_progress.is_empty() || self.blocked_count > 0 || !self.top_blockers.is_empty() {
            out.push_str("\n## Dependency Summary\n");

            if !self.in_progress.is_empty() {
                out.push_str("\n### Tasks In Progress:\n");
                for t in &self.in_progress {
                    let _ = writeln!(out, "- {}", t);
                }
            }

            if self.blocked_count > 0 || self.ready_count > 0 {
                let _ = writeln!(
                    out,
                    "\n**Status**: {} blocked, {} ready to work on",
                    self.blocked_count, self.ready_count
                );
            }

            if !self.top_blockers.is_empty() {
                out.push_str("\n### Top Blockers (completing these unblocks many tasks):\n");
                for b in &self.top_blockers {
                    let _ = writeln!(out, "- {}", b);
                }
            }
        }

        out
    }
}

/// 基础提示 + 可选上下文
pub fn build_recovery_prompt(base: &str, context: Option<&ProjectContext>) -> String {
    match context {
        Some(ctx) => format!("{}{}", base, ctx.render()),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_without_context() {
        assert_eq!(build_recovery_prompt("Reread AGENTS.md", None), "Reread AGENTS.md");
    }

    #[test]
    fn test_render_sections() {
        let ctx = ProjectContext {
            top_bottlenecks: vec!["bd-7".to_string()],
            next_actions: vec!["[bd-3] Fix auth".to_string()],
            health_status: Some("warning".to_string()),
            has_drift: true,
            in_progress: vec!["[bd-9] Refactor".to_string()],
            blocked_count: 2,
            ready_count: 4,
            top_blockers: vec!["[bd-5] Schema (blocked by: bd-1, bd-2)".to_string()],
        };

        let prompt = build_recovery_prompt("BASE", Some(&ctx));

        assert!(prompt.starts_with("BASE\n\n# Project Context from Beads\n"));
        assert!(prompt.contains("## Current Bottlenecks (resolve these to unblock progress):\n- bd-7\n"));
        assert!(prompt.contains("## Recommended Next Actions:\n- [bd-3] Fix auth\n"));
        assert!(prompt.contains("## Project Health: warning\n"));
        assert!(prompt.contains("**Warning**: Project has drifted"));
        assert!(prompt.contains("### Tasks In Progress:\n- [bd-9] Refactor\n"));
        assert!(prompt.contains("**Status**: 2 blocked, 4 ready to work on\n"));
        assert!(prompt.contains("- [bd-5] Schema (blocked by: bd-1, bd-2)\n"));
    }

    #[test]
    fn test_render_empty_context_only_header() {
        let ctx = ProjectContext::default();
        assert_eq!(ctx.render(), "\n\n# Project Context from Beads\n");
    }
}
