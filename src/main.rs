mod cli;
mod config;
mod error;
mod rum;
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = cli::CliArgs::parse();

    // 配置优先级：命令行 > 配置文件 > 默认值
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::Config::default_path);
    let config = config::Config::load_or_default(&config_path)?.apply_cli(&args);
    log::info!("使用 RemoteUpdateManager: {}", config.rum_path.display());

    tui::run(config).await?;

    Ok(())
}
