//! tmux 客户端 - 通过 tmux 命令行实现 PaneProvider

use super::{Pane, PaneProvider, Session};
use crate::status::AgentType;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, error, info};

/// 格式化输出字段分隔符
const SEP: &str = "|===|";

/// 表示"没有 server / 没有 session"的 stderr 片段，其余失败都是真错误
const NO_SERVER_MARKERS: [&str; 4] = [
    "no server running",
    "no sessions",
    "No such file or directory",
    "error connecting to",
];

/// pane 标题格式：`<project>__<type>_<n>[_<variant>][[tag,tag]]`
static PANE_TITLE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^.+__(\w+)_\d+(?:_([A-Za-z0-9._/@:+-]+))?(?:\[([^\]]*)\])?$").ok()
});

/// tmux 客户端
pub struct TmuxClient {
    /// tmux 可执行文件
    binary: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    /// 指定 tmux 路径
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// tmux 是否可用
    pub fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {} {}", self.binary, args.join(" ")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(anyhow!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PaneProvider for TmuxClient {
    /// 列出所有 session；没有 tmux server 时返回空列表，其他失败返回错误
    fn list_sessions(&self) -> Result<Vec<Session>> {
        let format = format!("#{{session_name}}{SEP}#{{session_windows}}{SEP}#{{session_attached}}");
        let output = Command::new(&self.binary)
            .args(["list-sessions", "-F", &format])
            .output()
            .with_context(|| format!("failed to run {} list-sessions", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_server(&stderr) {
                debug!("No tmux server running");
                return Ok(Vec::new());
            }
            return Err(anyhow!("{} list-sessions failed: {}", self.binary, stderr.trim()));
        }

        Ok(parse_sessions(&String::from_utf8_lossy(&output.stdout)))
    }

    fn panes(&self, session: &str) -> Result<Vec<Pane>> {
        let format = format!(
            "#{{pane_id}}{SEP}#{{pane_index}}{SEP}#{{pane_title}}{SEP}#{{pane_current_command}}"
        );
        let output = self.run(&["list-panes", "-s", "-t", session, "-F", &format])?;
        let panes = parse_panes(&output);
        debug!(session = %session, count = panes.len(), "Listed panes");
        Ok(panes)
    }

    fn capture_output(&self, pane_id: &str, max_lines: usize) -> Result<String> {
        let start = format!("-{}", max_lines);
        self.run(&[
            "capture-pane",
            "-t", pane_id,
            "-p",           // print to stdout
            "-S", &start,   // start from N lines back
        ])
        .with_context(|| format!("failed to capture pane {}", pane_id))
    }

    fn pane_activity(&self, pane_id: &str) -> Result<DateTime<Utc>> {
        let output = self.run(&["display-message", "-p", "-t", pane_id, "#{pane_last_activity}"])?;
        parse_epoch(output.trim()).ok_or_else(|| anyhow!("invalid activity timestamp for {}: {:?}", pane_id, output.trim()))
    }

    /// 使用 -l 发送字面文本，再单独发送 Enter
    fn send_keys(&self, target: &str, text: &str, submit: bool) -> Result<()> {
        info!(target = %target, text_len = text.len(), "Sending keys to tmux pane");

        let status = Command::new(&self.binary)
            .args(["send-keys", "-t", target, "-l", text])
            .status()?;

        if !status.success() {
            error!(target = %target, "Failed to send text to tmux");
            return Err(anyhow!("Failed to send keys to {}", target));
        }

        if !submit {
            return Ok(());
        }

        debug!(target = %target, "Text sent, now sending Enter");

        // Enter 不加 -l，需要解释为按键
        let status = Command::new(&self.binary)
            .args(["send-keys", "-t", target, "Enter"])
            .status()?;

        if status.success() {
            Ok(())
        } else {
            error!(target = %target, "Failed to send Enter key");
            Err(anyhow!("Failed to send Enter to {}", target))
        }
    }
}

fn is_no_server(stderr: &str) -> bool {
    NO_SERVER_MARKERS.iter().any(|marker| stderr.contains(marker))
}

fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = s.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

fn parse_sessions(output: &str) -> Vec<Session> {
    output
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(SEP).collect();
            let name = parts.first()?.to_string();
            Some(Session {
                name,
                windows: parts.get(1).and_then(|w| w.parse().ok()).unwrap_or(0),
                attached: parts.get(2).map(|a| *a != "0").unwrap_or(false),
            })
        })
        .collect()
}

fn parse_panes(output: &str) -> Vec<Pane> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(SEP).collect();
            if parts.len() < 4 {
                return None;
            }
            let (agent_type, variant, tags) = parse_pane_title(parts[2]);
            Some(Pane {
                id: parts[0].to_string(),
                index: parts[1].parse().unwrap_or(0),
                title: parts[2].to_string(),
                command: parts[3].to_string(),
                agent_type,
                variant,
                tags,
            })
        })
        .collect()
}

/// 从 pane 标题解析 agent 类型、变体和标签
///
/// 不符合命名格式的标题视为普通用户 shell。
pub fn parse_pane_title(title: &str) -> (AgentType, Option<String>, Vec<String>) {
    let Some(caps) = PANE_TITLE_RE.as_ref().and_then(|re| re.captures(title)) else {
        return (AgentType::User, None, Vec::new());
    };

    let agent_type = caps
        .get(1)
        .map(|m| AgentType::from_hint(m.as_str()))
        .unwrap_or_default();
    if !agent_type.is_known_agent() {
        return (AgentType::User, None, Vec::new());
    }

    let variant = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty());
    let tags = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    (agent_type, variant, tags)
}
