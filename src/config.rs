use crate::cli::CliArgs;
use crate::rum::{RunnerOptions, DEFAULT_RUM_PATH};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RemoteUpdateManager 可执行文件路径
    pub rum_path: PathBuf,
    /// 组织名称，显示在标题栏
    pub title: String,
    /// 取消时 SIGTERM 与 SIGKILL 之间的宽限期（秒）
    pub cancel_grace_secs: u64,
    /// 结果页自动关闭倒计时（秒），0 表示不自动关闭
    pub auto_close_secs: u64,
    /// 额外视为“已是最新”的退出码
    pub up_to_date_exit_codes: Vec<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rum_path: PathBuf::from(DEFAULT_RUM_PATH),
            title: "Organization Name".to_string(),
            cancel_grace_secs: 5,
            auto_close_secs: 30,
            up_to_date_exit_codes: Vec::new(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/rum-updater/config.toml")
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
            log::info!("已加载配置: {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_cli(mut self, args: &CliArgs) -> Self {
        if let Some(path) = &args.rum_path {
            self.rum_path = path.clone();
        }
        if let Some(title) = &args.title {
            self.title = title.clone();
        }
        self
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            up_to_date_exit_codes: self.up_to_date_exit_codes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.rum_path, PathBuf::from(DEFAULT_RUM_PATH));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "title = \"ACME\"\ncancel_grace_secs = 2\n").unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.title, "ACME");
        assert_eq!(config.runner_options().cancel_grace, Duration::from_secs(2));
        assert_eq!(config.auto_close_secs, 30);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cancel_grace_secs = \"soon\"").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = CliArgs::parse_from(["rum-updater", "--rum-path", "/opt/rum", "--title", "Lab"]);
        let config = Config::default().apply_cli(&args);
        assert_eq!(config.rum_path, PathBuf::from("/opt/rum"));
        assert_eq!(config.title, "Lab");
    }
}
