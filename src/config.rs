//! 配置加载
//!
//! 默认读取 `~/.config/agent-fleet-monitor/config.json`。文件不存在时使用默认值，
//! 每个字段都可以省略。

use crate::alerts::AlertConfig;
use crate::clock::{try_hours, try_minutes, try_seconds};
use crate::status::{AgentType, DetectorConfig, ErrorCategory, RecoveryConfig, Ruleset, RulesetBuilder};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 额外的错误规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraErrorPattern {
    pub category: ErrorCategory,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

/// 额外的提示符规则；`agent` 为空时对所有类型生效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraPromptPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub extra_error_patterns: Vec<ExtraErrorPattern>,
    pub extra_prompt_patterns: Vec<ExtraPromptPattern>,
}

impl ClassifierConfig {
    pub fn build_ruleset(&self) -> Result<Ruleset> {
        let mut builder = RulesetBuilder::with_defaults();
        for extra in &self.extra_error_patterns {
            builder = builder.error_pattern(extra.category, &extra.pattern, &describe(&extra.description, &extra.pattern))?;
        }
        for extra in &self.extra_prompt_patterns {
            let scope = extra.agent.as_deref().map(AgentType::from_hint);
            builder = builder.prompt_pattern(scope, &extra.pattern, &describe(&extra.description, &extra.pattern))?;
        }
        Ok(builder.build())
    }

    pub fn is_empty(&self) -> bool {
        self.extra_error_patterns.is_empty() && self.extra_prompt_patterns.is_empty()
    }
}

fn describe(description: &str, pattern: &str) -> String {
    if description.is_empty() {
        format!("custom: {}", pattern)
    } else {
        description.to_string()
    }
}

/// 全部配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub alerts: AlertConfig,
    pub recovery: RecoveryConfig,
    pub detector: DetectorConfig,
    pub classifier: ClassifierConfig,
}

impl MonitorConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/agent-fleet-monitor/config.json"))
    }

    /// 从 `path`（或默认路径）加载
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// 所有时长字段都必须能表示为 chrono::Duration
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("alerts.agent_stuck_minutes", try_minutes(self.alerts.agent_stuck_minutes)),
            ("alerts.bead_stale_hours", try_hours(self.alerts.bead_stale_hours)),
            ("alerts.resolved_prune_minutes", try_minutes(self.alerts.resolved_prune_minutes)),
            ("recovery.cooldown_secs", try_seconds(self.recovery.cooldown_secs)),
            ("recovery.max_event_age_secs", try_seconds(self.recovery.max_event_age_secs)),
            ("detector.activity_threshold_secs", try_seconds(self.detector.activity_threshold_secs)),
        ];
        for (field, value) in durations {
            if value.is_none() {
                bail!("{} is out of range", field);
            }
        }
        Ok(())
    }

    /// 编译分类规则集，非法正则在这里报错；没有额外规则时复用内置规则集
    pub fn ruleset(&self) -> Result<Arc<Ruleset>> {
        if self.classifier.is_empty() {
            return Ok(Ruleset::builtin());
        }
        Ok(Arc::new(self.classifier.build_ruleset()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MonitorConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"alerts": {{"agent_stuck_minutes": 10}}, "recovery": {{"cooldown_secs": 60}}}}"#).unwrap();

        let config = MonitorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.alerts.agent_stuck_minutes, 10);
        assert_eq!(config.alerts.bead_stale_hours, 24);
        assert_eq!(config.recovery.cooldown_secs, 60);
        assert_eq!(config.recovery.max_recoveries, 5);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = MonitorConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn test_out_of_range_duration_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"recovery": {{"cooldown_secs": 18446744073709551615}}}}"#).unwrap();

        let err = MonitorConfig::load(Some(file.path())).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Invalid config"));
        assert!(msg.contains("recovery.cooldown_secs"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_extra_patterns_compile() {
        let config = ClassifierConfig {
            extra_error_patterns: vec![ExtraErrorPattern {
                category: ErrorCategory::Crash,
                pattern: r"(?i)out of memory".to_string(),
                description: String::new(),
            }],
            extra_prompt_patterns: vec![ExtraPromptPattern {
                agent: Some("aider".to_string()),
                pattern: r"^aider>\s*$".to_string(),
                description: "aider prompt".to_string(),
            }],
        };
        let rules = config.build_ruleset().unwrap();
        assert_eq!(
            rules.detect_error("Fatal: Out of memory", 50).map(|m| m.category),
            Some(ErrorCategory::Crash)
        );
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let config = ClassifierConfig {
            extra_error_patterns: vec![ExtraErrorPattern {
                category: ErrorCategory::Generic,
                pattern: "(unclosed".to_string(),
                description: String::new(),
            }],
            ..Default::default()
        };
        assert!(config.build_ruleset().is_err());
    }
}
