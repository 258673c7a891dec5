//! RemoteUpdateManager 封装：列出可用更新、流式安装

pub mod parser;
pub mod streaming;
pub mod types;

// 重新导出常用类型
pub use streaming::{RunHandle, Runner, RunnerOptions};
pub use types::{Catalog, Outcome, Selection};

use crate::error::ToolError;
use parser::parse_list_output;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// RUM 的默认安装位置
pub const DEFAULT_RUM_PATH: &str = "/usr/local/bin/RemoteUpdateManager";

#[derive(Debug, Clone)]
pub struct RemoteUpdateManager {
    path: PathBuf,
    /// 克隆之间共享，保证目录版本号单调递增
    revision: Arc<AtomicU64>,
}

impl RemoteUpdateManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            revision: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 执行 `--action=list` 并解析出可用更新
    ///
    /// 零条记录且退出码为 0 时返回空目录而不是错误；这通常意味着
    /// 没有以管理员权限运行，由界面层提示用户。
    pub fn list_available_updates(&self) -> Result<Catalog, ToolError> {
        log::info!("执行 {} --action=list", self.path.display());

        let output = Command::new(&self.path)
            .arg("--action=list")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ToolError::from_spawn(e, &self.path))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            log::warn!("--action=list 失败: exit={:?}", output.status.code());
            let stderr = String::from_utf8_lossy(&output.stderr);
            let captured = if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{}\n{}", stdout, stderr)
            };
            return Err(ToolError::NonZeroExit {
                code: output.status.code(),
                output: captured,
            });
        }

        let entries = parse_list_output(&stdout);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("找到 {} 个可用更新 (revision {})", entries.len(), revision);
        Ok(Catalog::new(entries, revision))
    }

    /// `--action=install` 的参数；全选时不带 `--productVersions`
    pub fn install_args(&self, selection: &Selection) -> Vec<String> {
        let mut args = vec!["--action=install".to_string()];
        if !selection.covers_all() {
            args.push(format!("--productVersions={}", selection.identifiers().join(",")));
        }
        args
    }
}
