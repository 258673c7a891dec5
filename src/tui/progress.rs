use super::layout;
use super::state::{App, Phase};
use super::theme::{ACCENT, DIM, ERROR_RED};
use crate::rum::Outcome;
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame,
};

/// 安装中 / 结果页的按键；返回 true 表示已消费该按键
pub fn handle_progress_key(key: KeyEvent, app: &mut App) -> bool {
    match (app.phase, key.code) {
        (Phase::Running, KeyCode::Char('c') | KeyCode::Esc) => {
            app.cancel_install();
            true
        }
        (Phase::Running | Phase::Summary, KeyCode::Up) => {
            app.follow = false;
            app.scroll = app.scroll.saturating_sub(1);
            true
        }
        (Phase::Running | Phase::Summary, KeyCode::Down) => {
            app.scroll += 1;
            true
        }
        (Phase::Running, KeyCode::End) => {
            app.follow = true;
            true
        }
        (Phase::Summary, KeyCode::Enter) => {
            app.should_quit = true;
            true
        }
        _ => false,
    }
}

/// 渲染安装进度
pub fn render_running(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    layout::render_header(
        f,
        &format!("{} | ⚙️  正在安装更新...", app.config.title),
        chunks[0],
    );

    let body = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[1]);

    let Some(handle) = &app.run else {
        return;
    };
    let session = handle.session();

    let (ratio, label) = match session.progress {
        Some(p) => (p as f64 / 100.0, format!("{}%", p)),
        None => (0.0, "…".to_string()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" 进度 "))
        .gauge_style(Style::default().fg(ACCENT))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, body[0]);

    let status = Paragraph::new(format!(" {}", session.status)).style(Style::default().fg(DIM));
    f.render_widget(status, body[1]);

    let lines: Vec<String> = session.lines.iter().cloned().collect();
    layout::render_scrollable_content(f, "安装日志", &lines, app.scroll, body[2]);

    let footer = app
        .notice
        .clone()
        .unwrap_or_else(|| "安装进行中 | c 取消 | ↑↓ 滚动 | End 跟随".to_string());
    layout::render_footer(f, &footer, chunks[2]);
}

/// 结果页的正文行
pub fn summary_lines(outcome: &Outcome, installed: &[String]) -> Vec<String> {
    let mut lines = Vec::new();
    match outcome {
        Outcome::Success { message } => {
            lines.push(message.clone());
        }
        Outcome::PartialFailure { exit_code, diagnostics, .. } => {
            lines.push(format!("部分更新失败，错误码: {}", exit_code));
            push_diagnostics(&mut lines, diagnostics);
        }
        Outcome::Failure { exit_code, diagnostics } => {
            match exit_code {
                Some(code) => lines.push(format!("安装失败，错误码: {}", code)),
                None => lines.push("安装进程被终止".to_string()),
            }
            push_diagnostics(&mut lines, diagnostics);
        }
        Outcome::Cancelled => {
            lines.push("安装已取消。已完成的更新不会回滚。".to_string());
        }
    }

    lines.push(String::new());
    if installed.is_empty() {
        lines.push("没有安装任何更新。".to_string());
    } else {
        lines.push("以下应用已成功更新：".to_string());
        for app in installed {
            lines.push(format!("  • {}", app));
        }
    }
    lines
}

fn push_diagnostics(lines: &mut Vec<String>, diagnostics: &[String]) {
    if diagnostics.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push("── 诊断输出 ──".to_string());
    lines.extend(diagnostics.iter().map(|l| format!("  {}", l)));
}

/// 渲染结果页
pub fn render_summary(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());

    let Some(handle) = &app.run else {
        return;
    };
    let session = handle.session();
    let Some(outcome) = session.outcome() else {
        return;
    };

    let (title, color) = match outcome {
        Outcome::Success { .. } => ("✅ 更新完成", ACCENT),
        Outcome::Cancelled => ("⏹ 已取消", DIM),
        _ => ("❌ 更新完成但有错误", ERROR_RED),
    };
    render_summary_header(f, &format!("{} | {}", app.config.title, title), color, chunks[0]);

    let lines = summary_lines(outcome, &session.installed);
    layout::render_scrollable_content(f, "安装结果", &lines, app.scroll, chunks[1]);

    // 结果页停留期间耗时不再增长
    let finished = session.finished_at.unwrap_or_else(chrono::Local::now);
    let elapsed = finished - session.started_at;
    let footer = match app.seconds_until_close() {
        Some(secs) => format!(
            "耗时 {} 秒 | {} 秒后自动关闭 | Enter/q 关闭 | r 重新检查",
            elapsed.num_seconds(),
            secs
        ),
        None => format!(
            "耗时 {} 秒 | Enter/q 关闭 | r 重新检查",
            elapsed.num_seconds()
        ),
    };
    layout::render_footer(f, &footer, chunks[2]);
}

fn render_summary_header(f: &mut Frame, title: &str, color: ratatui::style::Color, area: Rect) {
    let header = Paragraph::new(title)
        .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL))
        .alignment(ratatui::layout::Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(header, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines_success() {
        let outcome = Outcome::Success { message: "已安装 1 个更新".to_string() };
        let lines = summary_lines(&outcome, &["Photoshop (v25.0)".to_string()]);
        assert_eq!(lines[0], "已安装 1 个更新");
        assert!(lines.contains(&"  • Photoshop (v25.0)".to_string()));
    }

    #[test]
    fn test_summary_lines_failure_shows_code_and_diagnostics() {
        let outcome = Outcome::Failure {
            exit_code: Some(3),
            diagnostics: vec!["Error: boom".to_string()],
        };
        let lines = summary_lines(&outcome, &[]);
        assert_eq!(lines[0], "安装失败，错误码: 3");
        assert!(lines.contains(&"  Error: boom".to_string()));
        assert_eq!(lines.last().unwrap(), "没有安装任何更新。");
    }
}
