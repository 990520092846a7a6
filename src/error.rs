//! 外部工具错误类型
//!
//! 依赖图分析工具（bv）和任务跟踪工具（bd）作为外部进程调用，
//! "未安装" 是一个独立的错误变体，调用方据此静默跳过，而不是匹配错误文本。

use std::io;

/// 外部数据源调用错误
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// 工具不在 PATH 中
    #[error("{tool} is not installed")]
    NotInstalled { tool: &'static str },

    /// 工具以非零状态退出
    #[error("{tool} {args} failed: {stderr}")]
    CommandFailed {
        tool: &'static str,
        args: String,
        stderr: String,
    },

    /// 输出不是预期的 JSON
    #[error("failed to parse {tool} output: {source}")]
    Parse {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to run {tool}: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ProviderError {
    pub fn is_not_installed(&self) -> bool {
        matches!(self, ProviderError::NotInstalled { .. })
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_installed_is_distinguished() {
        let missing = ProviderError::NotInstalled { tool: "bv" };
        let failed = ProviderError::CommandFailed {
            tool: "bv",
            args: "-robot-insights".to_string(),
            stderr: "not installed".to_string(),
        };

        assert!(missing.is_not_installed());
        // 错误文本中包含 "not installed" 也不算
        assert!(!failed.is_not_installed());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotInstalled { tool: "bd" };
        assert_eq!(err.to_string(), "bd is not installed");
    }
}
