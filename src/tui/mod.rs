mod catalog;
mod layout;
mod progress;
pub mod state;
mod theme;

use crate::config::Config;
use crate::error::ToolError;
use crate::rum::Runner;
use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Frame, Terminal};
use state::{App, AppEvent, Phase};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub async fn run(config: Config) -> Result<()> {
    let runner = Runner::new(
        crate::rum::RemoteUpdateManager::new(&config.rum_path),
        config.runner_options(),
    );
    let shutdown_grace = runner_shutdown_timeout(&config);

    // 终端初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, runner);
    let (tx, mut rx) = mpsc::channel(8);

    // 启动时列出可用更新
    spawn_listing(&mut app, &tx);

    // 主循环
    loop {
        app.poll_run();
        app.tick(Instant::now());

        terminal.draw(|f| ui(f, &app))?;

        // 处理按键
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        app.cancel_install();
                        app.should_quit = true;
                    }
                    KeyCode::Char('q') => {
                        if app.is_running() {
                            app.notice =
                                Some("安装进行中，请等待完成或按 c 取消".to_string());
                        } else {
                            app.should_quit = true;
                        }
                    }
                    KeyCode::Char('r')
                        if matches!(app.phase, Phase::Selecting | Phase::Summary | Phase::Error) =>
                    {
                        spawn_listing(&mut app, &tx);
                    }
                    // 委托给当前界面处理
                    _ => {
                        if !catalog::handle_catalog_key(key, &mut app) {
                            progress::handle_progress_key(key, &mut app);
                        }
                    }
                }
            }
        }

        // 处理异步事件
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::CatalogLoaded(catalog) => {
                    // 只接受当前这一轮刷新的结果
                    if app.phase == Phase::Listing {
                        app.on_catalog_loaded(catalog);
                    }
                }
                AppEvent::ListingFailed(err) => {
                    if app.phase == Phase::Listing {
                        app.on_listing_failed(err);
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    // 仍在运行的 RUM 需要先终止
    if let Some(handle) = app.run.as_mut() {
        handle.shutdown(shutdown_grace);
    }

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

/// 宽限期之后再多等一秒，给 SIGKILL 和回收留出时间
fn runner_shutdown_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.cancel_grace_secs + 1)
}

/// 在阻塞线程池中执行 --action=list，结果经 channel 送回主循环
fn spawn_listing(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    app.begin_listing();
    let rum = app.runner.rum().clone();
    let tx_clone = tx.clone();
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || rum.list_available_updates()).await;
        let event = match result {
            Ok(Ok(catalog)) => AppEvent::CatalogLoaded(catalog),
            Ok(Err(e)) => AppEvent::ListingFailed(e),
            Err(e) => AppEvent::ListingFailed(ToolError::Io(io::Error::other(e))),
        };
        let _ = tx_clone.send(event).await;
    });
}

fn ui(f: &mut Frame, app: &App) {
    match app.phase {
        Phase::Listing | Phase::Selecting => catalog::render_catalog(f, app),
        Phase::Running => progress::render_running(f, app),
        Phase::Summary => progress::render_summary(f, app),
        Phase::Error => catalog::render_error(f, app),
    }
}
