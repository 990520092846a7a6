//! 文件变更与冲突检测

pub mod conflicts;
pub mod store;

pub use conflicts::{conflicts_recent, conflicts_since, detect_conflicts, Conflict, ConflictSeverity};
pub use store::{FileChange, FileChangeStore, FileChangeType, DEFAULT_STORE_CAPACITY};
