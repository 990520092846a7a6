//! 告警生成 + 生命周期集成测试

mod common;

use agent_fleet_monitor::alerts::{
    AlertConfig, AlertGenerator, AlertTracker, AlertType, AlertsOutput, Severity, SOURCE_AGENTS, SOURCE_DISK,
    SOURCE_INSIGHTS, SOURCE_TASKS,
};
use agent_fleet_monitor::status::AgentType;
use agent_fleet_monitor::{Clock, ManualClock};
use chrono::Duration;
use common::{FakeDisk, FakeInsights, FakePanes, FakeTasks, ToolMode};
use std::sync::Arc;

struct Fixture {
    clock: Arc<ManualClock>,
    panes: Arc<FakePanes>,
    disk: Arc<FakeDisk>,
    insights: Arc<FakeInsights>,
    tasks: Arc<FakeTasks>,
    generator: AlertGenerator,
    tracker: AlertTracker,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let panes = Arc::new(FakePanes::new());
        let disk = Arc::new(FakeDisk::with_free_gb(100.0));
        let insights = Arc::new(FakeInsights::new(ToolMode::Ok));
        let tasks = Arc::new(FakeTasks::new(ToolMode::Ok));

        let generator = AlertGenerator::new(AlertConfig::default(), panes.clone(), clock.clone())
            .with_disk_probe(disk.clone())
            .with_insights(insights.clone())
            .with_tasks(tasks.clone());
        let tracker = AlertTracker::new(clock.clone());

        Self {
            clock,
            panes,
            disk,
            insights,
            tasks,
            generator,
            tracker,
        }
    }

    fn cycle(&self) -> Vec<String> {
        let generation = self.generator.generate_all();
        self.tracker.update(generation.alerts, &generation.failed_sources);
        generation.failed_sources
    }
}

// ===== agent 探测 =====

#[test]
fn test_rate_limit_pane_raises_warning() {
    // Given: Claude pane 输出限流信息
    let f = Fixture::new();
    f.panes.add_pane(
        "proj",
        "%1",
        1,
        AgentType::Claude,
        "working...\nError: 429 Too Many Requests\n",
        f.clock.now(),
    );

    // When
    let generation = f.generator.generate_all();

    // Then
    assert!(generation.failed_sources.is_empty());
    let alert = generation
        .alerts
        .iter()
        .find(|a| a.alert_type == AlertType::RateLimit)
        .expect("rate limit alert");
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.session, "proj");
    assert_eq!(alert.pane, "%1");
    assert_eq!(alert.source, SOURCE_AGENTS);
    assert!(alert.context.contains_key("matched_line"));
}

#[test]
fn test_crash_pane_is_critical() {
    let f = Fixture::new();
    f.panes.add_pane(
        "proj",
        "%2",
        2,
        AgentType::Codex,
        "thread 'main' panicked\npanic: runtime error: index out of range\n",
        f.clock.now(),
    );

    let alerts = f.generator.generate_all().alerts;
    let alert = alerts.iter().find(|a| a.alert_type == AlertType::AgentError).unwrap();
    assert_eq!(alert.severity, Severity::Critical);
}

#[test]
fn test_capture_failure_becomes_crash_alert() {
    let f = Fixture::new();
    f.panes.add_pane("proj", "%3", 3, AgentType::Claude, "", f.clock.now());
    f.panes.break_capture("%3");

    let generation = f.generator.generate_all();
    let alert = generation
        .alerts
        .iter()
        .find(|a| a.alert_type == AlertType::AgentCrashed)
        .unwrap();
    assert_eq!(alert.severity, Severity::Error);
    assert!(alert.message.contains("%3"));
    assert!(generation.failed_sources.is_empty());
}

#[test]
fn test_known_agent_at_shell_prompt_is_exited() {
    let f = Fixture::new();
    f.panes.add_pane("proj", "%4", 4, AgentType::Claude, "bye\nuser@host:~/proj$ ", f.clock.now());

    let alerts = f.generator.generate_all().alerts;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::AgentCrashed);
}

#[test]
fn test_user_shell_prompt_is_not_an_alert() {
    let f = Fixture::new();
    f.panes.add_pane("proj", "%5", 5, AgentType::User, "user@host:~/proj$ ", f.clock.now());

    assert!(f.generator.generate_all().alerts.is_empty());
}

#[test]
fn test_silent_busy_agent_is_stuck() {
    // Given: agent 在输出中间，10 分钟没有活动
    let f = Fixture::new();
    let long_ago = f.clock.now() - Duration::minutes(10);
    f.panes.add_pane("proj", "%6", 6, AgentType::Codex, "Compiling crate foo v0.1.0", long_ago);

    let alerts = f.generator.generate_all().alerts;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::AgentStuck);
    assert_eq!(alerts[0].severity, Severity::Warning);
}

#[test]
fn test_idle_agent_is_never_stuck() {
    let f = Fixture::new();
    let long_ago = f.clock.now() - Duration::hours(2);
    f.panes.add_pane("proj", "%7", 7, AgentType::Claude, "Done.\n> ", long_ago);

    assert!(f.generator.generate_all().alerts.is_empty());
}

#[test]
fn test_session_listing_failure_marks_agents_failed() {
    let f = Fixture::new();
    f.panes.fail_listing(true);

    let generation = f.generator.generate_all();
    assert_eq!(generation.failed_sources, vec![SOURCE_AGENTS.to_string()]);
}

#[test]
fn test_session_filter() {
    let clock = Arc::new(ManualClock::default());
    let panes = Arc::new(FakePanes::new());
    panes.add_pane("a", "%1", 1, AgentType::Claude, "panic: boom", clock.now());
    panes.add_pane("b", "%2", 1, AgentType::Claude, "panic: boom", clock.now());

    let config = AlertConfig {
        session_filter: Some("b".to_string()),
        ..Default::default()
    };
    let alerts = AlertGenerator::new(config, panes, clock).generate_all().alerts;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].session, "b");
}

#[test]
fn test_out_of_range_stuck_threshold_fails_agents_source() {
    let clock = Arc::new(ManualClock::default());
    let panes = Arc::new(FakePanes::new());
    panes.add_pane("proj", "%1", 1, AgentType::Codex, "Compiling", clock.now());

    let config = AlertConfig {
        agent_stuck_minutes: u64::MAX,
        ..Default::default()
    };
    let generation = AlertGenerator::new(config, panes, clock).generate_all();
    assert!(generation.alerts.is_empty());
    assert_eq!(generation.failed_sources, vec![SOURCE_AGENTS.to_string()]);
}

// ===== 磁盘 / 依赖环 / 停滞任务 =====

#[test]
fn test_disk_thresholds() {
    let f = Fixture::new();

    f.disk.set_free_gb(3.0);
    let alerts = f.generator.generate_all().alerts;
    let disk = alerts.iter().find(|a| a.alert_type == AlertType::DiskLow).unwrap();
    assert_eq!(disk.severity, Severity::Warning);
    assert!(disk.message.starts_with("Low disk space: 3.0 GB remaining"));

    f.disk.set_free_gb(0.5);
    let alerts = f.generator.generate_all().alerts;
    let disk = alerts.iter().find(|a| a.alert_type == AlertType::DiskLow).unwrap();
    assert_eq!(disk.severity, Severity::Critical);
}

#[test]
fn test_dependency_cycle_alert() {
    let f = Fixture::new();
    f.insights.add_cycle(&["bd-1", "bd-2", "bd-1"]);

    let alerts = f.generator.generate_all().alerts;
    let alert = alerts
        .iter()
        .find(|a| a.alert_type == AlertType::DependencyCycle)
        .unwrap();
    assert_eq!(alert.severity, Severity::Error);
    assert_eq!(alert.context["cycle_count"], serde_json::json!(1));
    assert_eq!(alert.context["cycles"], serde_json::json!(["bd-1 -> bd-2 -> bd-1"]));
}

#[test]
fn test_stale_task_alert_one_per_task() {
    let f = Fixture::new();
    f.tasks.add_task("bd-1", "old", f.clock.now() - Duration::hours(30));
    f.tasks.add_task("bd-2", "fresh", f.clock.now() - Duration::hours(1));

    let alerts = f.generator.generate_all().alerts;
    let stale: Vec<_> = alerts.iter().filter(|a| a.alert_type == AlertType::BeadStale).collect();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].bead_id, "bd-1");
}

// ===== 失败隔离 =====

#[test]
fn test_not_installed_is_silent() {
    let f = Fixture::new();
    f.insights.set_mode(ToolMode::NotInstalled);
    f.tasks.set_mode(ToolMode::NotInstalled);

    assert!(f.generator.generate_all().failed_sources.is_empty());
}

#[test]
fn test_broken_tools_reported_without_blocking_other_checks() {
    let f = Fixture::new();
    f.insights.set_mode(ToolMode::Broken);
    f.tasks.set_mode(ToolMode::Broken);
    f.disk.fail(true);
    f.panes.add_pane("proj", "%1", 1, AgentType::Claude, "panic: boom", f.clock.now());

    let generation = f.generator.generate_all();
    assert_eq!(
        generation.failed_sources,
        vec![SOURCE_DISK.to_string(), SOURCE_INSIGHTS.to_string(), SOURCE_TASKS.to_string()]
    );
    assert_eq!(generation.alerts.len(), 1);
}

#[test]
fn test_disabled_config_generates_nothing() {
    let clock = Arc::new(ManualClock::default());
    let panes = Arc::new(FakePanes::new());
    panes.add_pane("proj", "%1", 1, AgentType::Claude, "panic: boom", clock.now());
    let config = AlertConfig {
        enabled: false,
        ..Default::default()
    };

    let generation = AlertGenerator::new(config, panes, clock).generate_all();
    assert!(generation.alerts.is_empty());
    assert!(generation.failed_sources.is_empty());
}

// ===== 生命周期 =====

#[test]
fn test_failed_source_keeps_alerts_across_cycles() {
    // Given: 一个依赖环告警
    let f = Fixture::new();
    f.insights.add_cycle(&["bd-1", "bd-2"]);
    f.cycle();
    assert_eq!(f.tracker.active().len(), 1);

    // When: bv 暂时出错
    f.insights.set_mode(ToolMode::Broken);
    f.clock.advance(Duration::seconds(30));
    let failed = f.cycle();

    // Then: 告警仍然活跃
    assert_eq!(failed, vec![SOURCE_INSIGHTS.to_string()]);
    assert_eq!(f.tracker.active().len(), 1);

    // When: bv 恢复且环消失
    f.insights.set_mode(ToolMode::Ok);
    f.insights.cycles.lock().unwrap().clear();
    f.cycle();

    // Then: 告警解决
    assert!(f.tracker.active().is_empty());
    assert_eq!(f.tracker.resolved().len(), 1);
}

#[test]
fn test_activity_read_failure_keeps_stuck_alert() {
    // Given: 一个已卡住的 agent
    let f = Fixture::new();
    let long_ago = f.clock.now() - Duration::minutes(10);
    f.panes.add_pane("proj", "%6", 6, AgentType::Codex, "Compiling crate foo v0.1.0", long_ago);
    f.cycle();
    let created_at = f.tracker.active()[0].created_at;

    // When: 活动时间暂时读不到
    f.panes.break_activity("%6");
    f.clock.advance(Duration::seconds(30));
    let failed = f.cycle();

    // Then: agents 来源失败，告警保持原样
    assert_eq!(failed, vec![SOURCE_AGENTS.to_string()]);
    let active = f.tracker.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].alert_type, AlertType::AgentStuck);

    // When: 活动时间恢复
    f.panes.set_activity("%6", long_ago);
    f.clock.advance(Duration::seconds(30));
    f.cycle();

    // Then: 同一实例继续计数
    let active = f.tracker.active();
    assert_eq!(active[0].count, 2);
    assert_eq!(active[0].created_at, created_at);
    assert!(f.tracker.resolved().is_empty());
}

#[test]
fn test_escalation_through_cycles() {
    let f = Fixture::new();
    f.disk.set_free_gb(3.0);
    f.cycle();
    f.disk.set_free_gb(0.5);
    f.clock.advance(Duration::seconds(30));
    f.cycle();
    f.disk.set_free_gb(3.0);
    f.clock.advance(Duration::seconds(30));
    f.cycle();

    let active = f.tracker.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, Severity::Critical);
    assert_eq!(active[0].count, 3);
}

#[test]
fn test_envelope_json_shape() {
    let f = Fixture::new();
    f.disk.set_free_gb(3.0);
    f.cycle();

    let output = AlertsOutput::build(&f.tracker, f.generator.config(), false, f.clock.now());
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["summary"]["total_active"], 1);
    assert_eq!(json["summary"]["by_type"]["disk_low"], 1);
    assert_eq!(json["active"][0]["type"], "disk_low");
    assert_eq!(json["config"]["agent_stuck_minutes"], 5);
    assert!(json.get("resolved").is_none());
}
