//! 告警 JSON 输出

use super::tracker::AlertTracker;
use super::types::{Alert, AlertConfig, AlertSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `afm alerts` 输出的 JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsOutput {
    pub generated_at: DateTime<Utc>,
    pub active: Vec<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Vec<Alert>>,
    pub summary: AlertSummary,
    pub config: AlertConfig,
}

impl AlertsOutput {
    /// 取跟踪器快照；只有 `include_resolved` 时才带上已解决告警
    pub fn build(tracker: &AlertTracker, config: &AlertConfig, include_resolved: bool, now: DateTime<Utc>) -> Self {
        let snapshot = tracker.snapshot();
        Self {
            generated_at: now,
            active: snapshot.active,
            resolved: include_resolved.then_some(snapshot.resolved),
            summary: snapshot.summary,
            config: config.clone(),
        }
    }
}

/// 每条告警一行：`"<session>: <message> (pane <id>)"`，空字段省略
pub fn alert_lines(alerts: &[Alert]) -> Vec<String> {
    alerts
        .iter()
        .map(|alert| {
            let mut line = alert.message.clone();
            if !alert.session.is_empty() {
                line = format!("{}: {}", alert.session, line);
            }
            if !alert.pane.is_empty() {
                line.push_str(&format!(" (pane {})", alert.pane));
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::{AlertType, Severity};
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    #[test]
    fn test_alert_lines() {
        let now = Utc::now();
        let alerts = vec![
            Alert::for_pane(AlertType::AgentStuck, Severity::Warning, "proj", "%3", "stuck", now),
            Alert::global(AlertType::DiskLow, Severity::Critical, "Low disk space", now),
        ];
        assert_eq!(
            alert_lines(&alerts),
            vec!["proj: stuck (pane %3)".to_string(), "Low disk space".to_string()]
        );
    }

    #[test]
    fn test_build_omits_resolved_unless_requested() {
        let clock = Arc::new(ManualClock::default());
        let tracker = AlertTracker::new(clock.clone());
        tracker.update(
            vec![Alert::global(AlertType::DiskLow, Severity::Warning, "disk", clock.now())],
            &[],
        );
        tracker.update(vec![], &[]);

        let config = AlertConfig::default();
        let without = AlertsOutput::build(&tracker, &config, false, clock.now());
        assert!(without.resolved.is_none());
        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("resolved").is_none());

        let with = AlertsOutput::build(&tracker, &config, true, clock.now());
        assert_eq!(with.resolved.map(|r| r.len()), Some(1));
        assert_eq!(with.summary.total_resolved, 1);
    }
}
