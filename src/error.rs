//! 错误类型
//!
//! - ToolError: 调用 RemoteUpdateManager 本身失败
//! - SelectionError: 用户选择无效
//! - RunError: 启动安装会话失败
//!
//! 运行中途的失败不走这里，统一作为 `RunEvent::Finished` 送达。

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    /// 可执行文件不存在或不可执行
    #[error("找不到 RemoteUpdateManager: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("RemoteUpdateManager 退出码非零 ({})", display_code(*code))]
    NonZeroExit { code: Option<i32>, output: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("未选择任何更新")]
    Empty,

    #[error("未知的更新: {0}")]
    Unknown(String),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    InvalidSelection(#[from] SelectionError),

    #[error("已有更新正在进行")]
    AlreadyRunning,

    #[error(transparent)]
    Tool(#[from] ToolError),
}

fn display_code(code: Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "被信号终止".to_string(),
    }
}

impl ToolError {
    /// 根据 spawn 时的 io 错误判断是否属于“找不到工具”
    pub fn from_spawn(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ToolError::NotFound {
                    path: path.to_path_buf(),
                }
            }
            _ => ToolError::Io(err),
        }
    }
}
