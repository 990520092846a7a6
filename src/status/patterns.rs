//! 分类规则表
//!
//! 错误规则和提示符规则以声明式表格定义，启动时编译成不可变的 [`Ruleset`]。
//! 配置文件中的额外规则通过 [`RulesetBuilder`] 在构建时合并，运行期不再修改。

use super::ansi::strip_ansi;
use super::types::{AgentType, ErrorCategory};
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// 错误检测默认扫描的行数
pub const DEFAULT_SCAN_LINES: usize = 50;

/// 空闲检测从末尾检查的非空行数
const PROMPT_LOOKBACK_LINES: usize = 3;

/// 规则匹配方式
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    /// 子串匹配，比正则快
    Literal(String),
}

impl Matcher {
    pub fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(line),
            Matcher::Literal(lit) => line.contains(lit.as_str()),
        }
    }
}

/// 错误检测规则
#[derive(Debug, Clone)]
pub struct ErrorRule {
    pub category: ErrorCategory,
    pub matcher: Matcher,
    pub description: String,
}

/// 提示符检测规则
#[derive(Debug, Clone)]
pub struct PromptRule {
    /// None 表示对所有类型生效
    pub scope: Option<AgentType>,
    pub regex: Regex,
    pub description: String,
    /// 通用 shell 提示符回退规则，对已知 agent 不生效
    pub generic_shell: bool,
}

/// 错误匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMatch {
    pub category: ErrorCategory,
    /// 命中的那一行（已去除 ANSI 和首尾空白）
    pub line: String,
    pub description: String,
}

enum Pat {
    Re(&'static str),
    Lit(&'static str),
}

use Pat::{Lit, Re};

/// 默认错误规则，按优先级排列，先命中者胜出
const ERROR_TABLE: &[(ErrorCategory, Pat, &str)] = &[
    // 限流
    (ErrorCategory::RateLimit, Re(r"(?i)rate[\s._-]?limit"), "Rate limit message"),
    (ErrorCategory::RateLimit, Re(r"(?i)(http|status|error|code).{0,10}\b429\b"), "HTTP 429 status"),
    (ErrorCategory::RateLimit, Re(r"(?i)\b429\b.{0,10}(too many|rate|limit)"), "429 with message"),
    (ErrorCategory::RateLimit, Re(r"(?i)too many requests"), "Too many requests"),
    (ErrorCategory::RateLimit, Re(r"(?i)quota exceeded"), "Quota exceeded"),
    (ErrorCategory::RateLimit, Re(r"(?i)try again (later|in)"), "Retry message"),
    (ErrorCategory::RateLimit, Re(r"(?i)requests per (minute|second|hour)"), "Rate description"),
    (ErrorCategory::RateLimit, Re(r"(?i)throttl(ed|ing)"), "Throttling"),
    // 认证：状态码需要上下文，避免误报
    (ErrorCategory::Auth, Re(r"(?i)(http|status|error|code).{0,10}\b401\b"), "HTTP 401 Unauthorized"),
    (ErrorCategory::Auth, Re(r"(?i)\b401\b.{0,10}(unauthorized|error|denied)"), "401 with message"),
    (ErrorCategory::Auth, Re(r"(?i)(http|status|error|code).{0,10}\b403\b"), "HTTP 403 Forbidden"),
    (ErrorCategory::Auth, Re(r"(?i)\b403\b.{0,10}(forbidden|error|denied)"), "403 with message"),
    (ErrorCategory::Auth, Re(r"(?i)\bunauthorized\b"), "Unauthorized"),
    (ErrorCategory::Auth, Re(r"(?i)\bforbidden\b"), "Forbidden"),
    (
        ErrorCategory::Auth,
        Re(r"(?i)(invalid|expired|missing)[\s._-]?(api[\s._-]?)?(key|token|credential)"),
        "Invalid credentials",
    ),
    (ErrorCategory::Auth, Re(r"(?i)authentication (failed|error|required)"), "Auth failure"),
    (ErrorCategory::Auth, Re(r"(?i)access denied"), "Access denied"),
    // 网络
    (ErrorCategory::Connection, Re(r"(?i)connection (refused|reset|closed|timed?\s*out)"), "Connection issue"),
    (ErrorCategory::Connection, Lit("ECONNREFUSED"), "ECONNREFUSED"),
    (ErrorCategory::Connection, Lit("ECONNRESET"), "ECONNRESET"),
    (ErrorCategory::Connection, Lit("ETIMEDOUT"), "ETIMEDOUT"),
    (ErrorCategory::Connection, Lit("ENOTFOUND"), "ENOTFOUND"),
    (ErrorCategory::Connection, Re(r"(?i)network (error|unreachable)"), "Network error"),
    (ErrorCategory::Connection, Re(r"(?i)dns (error|resolution|lookup)"), "DNS error"),
    (ErrorCategory::Connection, Re(r"(?i)socket hang up"), "Socket hang up"),
    (ErrorCategory::Connection, Re(r"(?i)no route to host"), "No route"),
    (ErrorCategory::Connection, Re(r"(?i)host (not found|unreachable)"), "Host unreachable"),
    // 崩溃
    (ErrorCategory::Crash, Lit("panic:"), "Go panic"),
    (ErrorCategory::Crash, Lit("fatal:"), "Fatal error"),
    (ErrorCategory::Crash, Lit("FATAL:"), "Fatal error uppercase"),
    (ErrorCategory::Crash, Lit("segmentation fault"), "Segfault"),
    (ErrorCategory::Crash, Lit("Segmentation fault"), "Segfault capitalized"),
    (ErrorCategory::Crash, Lit("SIGSEGV"), "SIGSEGV signal"),
    (ErrorCategory::Crash, Lit("SIGKILL"), "SIGKILL signal"),
    (ErrorCategory::Crash, Lit("SIGTERM"), "SIGTERM signal"),
    (ErrorCategory::Crash, Lit("Traceback (most recent"), "Python traceback"),
    (ErrorCategory::Crash, Re(r"(?i)unhandled (exception|error|rejection)"), "Unhandled exception"),
    (ErrorCategory::Crash, Re(r"(?i)stack trace:"), "Stack trace"),
    (ErrorCategory::Crash, Re(r"at [A-Za-z_./\\]\S*:\d+:\d+"), "JS stack frame"),
    // 通用错误（兜底）
    (ErrorCategory::Generic, Re(r"(?i)^error:"), "Error prefix"),
    (ErrorCategory::Generic, Re(r"(?i)\berror\b.*\bfailed\b"), "Error failed"),
];

/// 默认提示符规则：agent 专属在前，通用回退在后
const PROMPT_TABLE: &[(Option<AgentType>, &str, &str)] = &[
    (Some(AgentType::Claude), r"(?i)claude>?\s*$", "Claude prompt"),
    (Some(AgentType::Claude), r">\s*$", "Claude simple prompt"),
    (Some(AgentType::Claude), r"❯\s*$", "Claude fancy prompt"),
    (Some(AgentType::Codex), r"(?i)codex>?\s*$", "Codex prompt"),
    (Some(AgentType::Gemini), r"(?i)gemini>?\s*$", "Gemini prompt"),
    (Some(AgentType::Cursor), r"(?i)cursor>?\s*$", "Cursor prompt"),
    (Some(AgentType::Windsurf), r"(?i)windsurf>?\s*$", "Windsurf prompt"),
    (Some(AgentType::Aider), r"(?i)aider>?\s*$", "Aider prompt"),
    (Some(AgentType::Aider), r">\s*$", "Aider simple prompt"),
    (Some(AgentType::User), r"[$%>]\s*$", "Standard shell prompt"),
    (Some(AgentType::User), r"❯\s*$", "Fancy shell prompt"),
    (None, r">\s*$", "Generic > prompt"),
];

/// 通用 shell 提示符，只对 user / 未知类型生效
const GENERIC_SHELL_PROMPT: &str = r"[$%]\s*$";

static BUILTIN: LazyLock<Arc<Ruleset>> = LazyLock::new(|| Arc::new(RulesetBuilder::with_defaults().build()));

/// 编译后的不可变规则集
#[derive(Debug, Clone)]
pub struct Ruleset {
    error_rules: Vec<ErrorRule>,
    prompt_rules: Vec<PromptRule>,
}

impl Ruleset {
    /// 内置默认规则集（进程内共享）
    pub fn builtin() -> Arc<Ruleset> {
        Arc::clone(&BUILTIN)
    }

    pub fn builder() -> RulesetBuilder {
        RulesetBuilder::with_defaults()
    }

    pub fn error_rules(&self) -> &[ErrorRule] {
        &self.error_rules
    }

    pub fn prompt_rules(&self) -> &[PromptRule] {
        &self.prompt_rules
    }

    /// 按优先级检测错误，返回第一条命中的规则及命中行
    ///
    /// 只扫描末尾 `scan_lines` 行。同一规则命中多行时取最新的一行。
    pub fn detect_error(&self, output: &str, scan_lines: usize) -> Option<ErrorMatch> {
        let clean = strip_ansi(output);
        let lines = recent_lines(&clean, scan_lines);

        self.error_rules.iter().find_map(|rule| {
            lines
                .iter()
                .rev()
                .find(|line| rule.matcher.is_match(line))
                .map(|line| ErrorMatch {
                    category: rule.category,
                    line: line.trim().to_string(),
                    description: rule.description.clone(),
                })
        })
    }

    /// 返回所有命中的错误类别（去重，按优先级）
    pub fn detect_all_errors(&self, output: &str, scan_lines: usize) -> Vec<ErrorCategory> {
        let clean = strip_ansi(output);
        let lines = recent_lines(&clean, scan_lines);

        let mut found = Vec::new();
        for rule in &self.error_rules {
            if found.contains(&rule.category) {
                continue;
            }
            if lines.iter().any(|line| rule.matcher.is_match(line)) {
                found.push(rule.category);
            }
        }
        found
    }

    /// 判断一行是否是提示符
    pub fn is_prompt_line(&self, line: &str, agent: AgentType) -> bool {
        let clean = strip_ansi(line);
        let line = clean.trim();
        if line.is_empty() {
            return false;
        }

        self.prompt_rules.iter().any(|rule| {
            if let Some(scope) = rule.scope {
                if scope != agent {
                    return false;
                }
            }
            // 已知 agent 的 pane 出现 shell 提示符说明 agent 已退出，而不是空闲
            if rule.generic_shell && agent.is_known_agent() {
                return false;
            }
            rule.regex.is_match(line)
        })
    }

    /// 根据末尾输出判断是否停在提示符
    pub fn detect_idle(&self, output: &str, agent: AgentType) -> bool {
        let clean = strip_ansi(output);

        if !agent.is_known_agent() && clean.trim_end().ends_with('$') {
            return true;
        }

        let mut checked = 0;
        for line in clean.lines().rev() {
            if checked >= PROMPT_LOOKBACK_LINES {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            checked += 1;
            if self.is_prompt_line(line, agent) {
                return true;
            }
        }

        // 完全没有输出：只有 user / 未知类型视为空闲
        checked == 0 && !agent.is_known_agent()
    }

    /// 已知 agent 的最后一行是裸 shell 提示符，说明 agent 进程已退出
    pub fn looks_exited(&self, output: &str, agent: AgentType) -> bool {
        if !agent.is_known_agent() {
            return false;
        }
        let last = last_non_empty_line(output);
        if last.is_empty() || self.is_prompt_line(&last, agent) {
            return false;
        }
        self.prompt_rules
            .iter()
            .filter(|rule| rule.generic_shell)
            .any(|rule| rule.regex.is_match(&last))
    }
}

/// 最后一个非空行（已去除 ANSI）
pub fn last_non_empty_line(output: &str) -> String {
    strip_ansi(output)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn recent_lines(text: &str, scan_lines: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(scan_lines);
    lines[start..].to_vec()
}

/// 规则集构建器
#[derive(Debug, Clone)]
pub struct RulesetBuilder {
    error_rules: Vec<ErrorRule>,
    prompt_rules: Vec<PromptRule>,
}

impl RulesetBuilder {
    /// 空构建器
    pub fn empty() -> Self {
        Self {
            error_rules: Vec::new(),
            prompt_rules: Vec::new(),
        }
    }

    /// 从默认表格开始
    pub fn with_defaults() -> Self {
        let error_rules = ERROR_TABLE
            .iter()
            .filter_map(|(category, pat, description)| {
                let matcher = match pat {
                    Re(p) => Matcher::Regex(Regex::new(p).ok()?),
                    Lit(s) => Matcher::Literal((*s).to_string()),
                };
                Some(ErrorRule {
                    category: *category,
                    matcher,
                    description: (*description).to_string(),
                })
            })
            .collect();

        let mut prompt_rules: Vec<PromptRule> = PROMPT_TABLE
            .iter()
            .filter_map(|(scope, p, description)| {
                Some(PromptRule {
                    scope: *scope,
                    regex: Regex::new(p).ok()?,
                    description: (*description).to_string(),
                    generic_shell: false,
                })
            })
            .collect();

        if let Ok(regex) = Regex::new(GENERIC_SHELL_PROMPT) {
            prompt_rules.push(PromptRule {
                scope: None,
                regex,
                description: "Generic shell prompt".to_string(),
                generic_shell: true,
            });
        }

        Self {
            error_rules,
            prompt_rules,
        }
    }

    /// 追加错误规则，排在同类别默认规则之后
    pub fn error_pattern(mut self, category: ErrorCategory, pattern: &str, description: &str) -> Result<Self> {
        if !category.is_error() {
            anyhow::bail!("error pattern {:?} must name a category", pattern);
        }
        let regex = Regex::new(pattern).with_context(|| format!("invalid error pattern: {}", pattern))?;
        let rule = ErrorRule {
            category,
            matcher: Matcher::Regex(regex),
            description: description.to_string(),
        };
        let at = self
            .error_rules
            .iter()
            .rposition(|r| r.category == category)
            .map(|i| i + 1)
            .unwrap_or_else(|| {
                self.error_rules
                    .iter()
                    .position(|r| r.category > category)
                    .unwrap_or(self.error_rules.len())
            });
        self.error_rules.insert(at, rule);
        Ok(self)
    }

    /// 追加提示符规则，排在通用回退规则之前
    pub fn prompt_pattern(mut self, scope: Option<AgentType>, pattern: &str, description: &str) -> Result<Self> {
        let regex = Regex::new(pattern).with_context(|| format!("invalid prompt pattern: {}", pattern))?;
        let rule = PromptRule {
            scope,
            regex,
            description: description.to_string(),
            generic_shell: false,
        };
        let at = self
            .prompt_rules
            .iter()
            .position(|r| r.scope.is_none())
            .unwrap_or(self.prompt_rules.len());
        self.prompt_rules.insert(at, rule);
        Ok(self)
    }

    pub fn build(self) -> Ruleset {
        Ruleset {
            error_rules: self.error_rules,
            prompt_rules: self.prompt_rules,
        }
    }
}

impl Default for RulesetBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}
