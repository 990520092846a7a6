//! Agent Fleet Monitor CLI

use agent_fleet_monitor::alerts::SysinfoDiskProbe;
use agent_fleet_monitor::changes::conflicts_recent;
use agent_fleet_monitor::status::{state_summary, UnifiedDetector};
use agent_fleet_monitor::{
    alert_lines, AlertsOutput, BeadsCli, Clock, FileChange, FileChangeStore, MonitorConfig, OutputClassifier,
    PaneProvider, Providers, Supervisor, SystemClock, TmuxClient,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "afm")]
#[command(about = "Agent Fleet Monitor - 监控 tmux 中的 AI 编码 agent")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/agent-fleet-monitor/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行一次检测并输出告警 JSON
    Alerts {
        /// 包含已解决的告警
        #[arg(long)]
        include_resolved: bool,
        /// 每条告警一行，不输出 JSON
        #[arg(long)]
        plain: bool,
        /// 只检查指定 session
        #[arg(long, short)]
        session: Option<String>,
    },
    /// 显示各 pane 的 agent 状态
    Status {
        /// 只检查指定 session
        session: Option<String>,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 周期性检测，检测到上下文压缩时发送恢复提示
    Watch {
        /// 轮询间隔（秒）
        #[arg(long, short, default_value = "30")]
        interval: u64,
        /// 只告警，不发送恢复提示
        #[arg(long)]
        no_recover: bool,
    },
    /// 从 JSONL 变更日志检测多 agent 编辑冲突
    Conflicts {
        /// 每行一条文件变更记录
        #[arg(long, short)]
        input: PathBuf,
        /// 时间窗口（分钟）
        #[arg(long, default_value = "60")]
        window_minutes: i64,
    },
}

fn providers(config: &MonitorConfig) -> Providers {
    let beads = Arc::new(BeadsCli::new());
    let mut providers = Providers::new(Arc::new(TmuxClient::new()));
    providers.disk = Some(Arc::new(SysinfoDiskProbe::new()));
    providers.insights = Some(beads.clone());
    providers.tasks = Some(beads);
    debug!(projects_dir = ?config.alerts.projects_dir, "Providers ready");
    providers
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，例如: RUST_LOG=debug afm watch
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_fleet_monitor=info,afm=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = MonitorConfig::load(cli.config.as_deref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Alerts {
            include_resolved,
            plain,
            session,
        } => {
            if session.is_some() {
                config.alerts.session_filter = session;
            }
            let supervisor = Supervisor::new(&config, providers(&config), clock.clone())?.without_recovery();
            let report = supervisor.run_cycle();

            if plain {
                for line in alert_lines(&report.active) {
                    println!("{}", line);
                }
            } else {
                let output = AlertsOutput::build(supervisor.tracker(), &config.alerts, include_resolved, clock.now());
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Commands::Status { session, json } => {
            let tmux = Arc::new(TmuxClient::new());
            let classifier = OutputClassifier::with_ruleset(config.ruleset()?);
            let detector = UnifiedDetector::new(config.detector.clone(), tmux.clone(), clock.clone())
                .with_classifier(classifier);

            let sessions = match session {
                Some(name) => vec![name],
                None => tmux.list_sessions()?.into_iter().map(|s| s.name).collect(),
            };

            let mut all = Vec::new();
            for name in sessions {
                match detector.detect_all(&name) {
                    Ok(statuses) => all.extend(statuses.into_iter().map(|s| (name.clone(), s))),
                    Err(e) => warn!(session = %name, error = %e, "Status detection failed"),
                }
            }

            if json {
                let statuses: Vec<_> = all.iter().map(|(_, s)| s).collect();
                println!("{}", serde_json::to_string_pretty(&statuses)?);
            } else if all.is_empty() {
                println!("没有发现 agent pane");
            } else {
                for (session, status) in &all {
                    let error = if status.error_type.is_error() {
                        format!(" [{}]", status.error_type)
                    } else {
                        String::new()
                    };
                    println!(
                        "{} {}:{} {} {}{}",
                        status.state.icon(),
                        session,
                        status.pane_id,
                        status.pane_name,
                        status.state,
                        error
                    );
                }
                let statuses: Vec<_> = all.into_iter().map(|(_, s)| s).collect();
                let summary = state_summary(&statuses);
                let mut parts: Vec<String> = summary.iter().map(|(state, n)| format!("{}={}", state, n)).collect();
                parts.sort();
                println!("\n{}", parts.join(" "));
            }
        }
        Commands::Watch { interval, no_recover } => {
            let mut supervisor = Supervisor::new(&config, providers(&config), clock.clone())?;
            if no_recover {
                supervisor = supervisor.without_recovery();
            }
            let supervisor = Arc::new(supervisor);

            info!(interval, recover = !no_recover, "Watch started");
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sup = supervisor.clone();
                        let report = tokio::task::spawn_blocking(move || sup.run_cycle())
                            .await
                            .context("Cycle task panicked")?;
                        for alert in &report.newly_resolved {
                            println!("✅ resolved: {}", alert.message);
                        }
                        for line in alert_lines(&report.active) {
                            println!("⚠️  {}", line);
                        }
                    }
                    _ = &mut shutdown => {
                        info!("Watch stopped");
                        break;
                    }
                }
            }
        }
        Commands::Conflicts { input, window_minutes } => {
            let content =
                fs::read_to_string(&input).with_context(|| format!("Failed to read {}", input.display()))?;
            let store = FileChangeStore::default();
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let change: FileChange = serde_json::from_str(line)
                    .with_context(|| format!("Invalid change record at {}:{}", input.display(), i + 1))?;
                store.add(change);
            }

            let window = chrono::Duration::try_minutes(window_minutes)
                .with_context(|| format!("--window-minutes out of range: {}", window_minutes))?;
            let conflicts = conflicts_recent(&store, window, clock.now());
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
    }

    Ok(())
}
