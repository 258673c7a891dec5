//! 命令行参数

use clap::Parser;
use std::path::PathBuf;

/// Adobe RemoteUpdateManager 的终端图形前端
#[derive(Parser, Debug, Clone)]
#[command(name = "rum-updater", version, about)]
pub struct CliArgs {
    /// RemoteUpdateManager 可执行文件路径
    #[arg(long, value_name = "PATH")]
    pub rum_path: Option<PathBuf>,

    /// 组织名称（显示在标题栏）
    #[arg(long)]
    pub title: Option<String>,

    /// 配置文件路径（默认 ~/.config/rum-updater/config.toml）
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
