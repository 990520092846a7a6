//! 磁盘空间探测

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// 磁盘空间探测结果
#[derive(Debug, Clone, PartialEq)]
pub struct DiskSpace {
    /// 实际检查的路径（项目目录不存在时回退到 `/`）
    pub path: PathBuf,
    pub free_bytes: u64,
}

impl DiskSpace {
    pub fn free_gb(&self) -> f64 {
        self.free_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// 磁盘空间来源
pub trait DiskProbe: Send + Sync {
    fn free_space(&self, path: &Path) -> Result<DiskSpace>;
}

/// 基于 sysinfo 的实现：选择挂载点是路径最长前缀的磁盘
#[derive(Debug, Default)]
pub struct SysinfoDiskProbe;

impl SysinfoDiskProbe {
    pub fn new() -> Self {
        Self
    }
}

impl DiskProbe for SysinfoDiskProbe {
    fn free_space(&self, path: &Path) -> Result<DiskSpace> {
        let checked = path
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from("/"));

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| checked.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| anyhow!("no mounted disk contains {}", checked.display()))?;

        Ok(DiskSpace {
            path: checked,
            free_bytes: disk.available_space(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_gb() {
        let space = DiskSpace {
            path: PathBuf::from("/"),
            free_bytes: 3 * 1024 * 1024 * 1024,
        };
        assert!((space.free_gb() - 3.0).abs() < f64::EPSILON);
    }
}
