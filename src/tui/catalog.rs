use super::layout;
use super::state::{App, Phase};
use super::theme::{ACCENT, BRIGHT_WHITE, DIM, SEL_BG};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Alignment, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

/// 处理选择界面的按键，返回 true 表示已消费该按键
pub fn handle_catalog_key(key: KeyEvent, app: &mut App) -> bool {
    if app.phase != Phase::Selecting {
        return false;
    }
    match key.code {
        KeyCode::Up => {
            app.move_up();
            true
        }
        KeyCode::Down => {
            app.move_down();
            true
        }
        KeyCode::Char(' ') => {
            app.toggle_current();
            // 勾选后自动下移
            app.move_down();
            app.notice = None;
            true
        }
        KeyCode::Char('a') => {
            app.toggle_all();
            app.notice = None;
            true
        }
        KeyCode::Enter => {
            app.start_install();
            true
        }
        _ => false,
    }
}

/// 渲染列表加载中 / 选择界面
pub fn render_catalog(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());

    let title = match app.phase {
        Phase::Listing => "🔍 正在检查可用更新...".to_string(),
        _ => format!("📝 可用更新 ({})", app.catalog.len()),
    };
    layout::render_header(f, &format!("{} | {}", app.config.title, title), chunks[0]);

    if app.phase == Phase::Listing {
        let waiting = Paragraph::new(format!(
            "正在执行 {} --action=list ...",
            app.runner.rum().path().display()
        ))
        .style(Style::default().fg(DIM))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        f.render_widget(waiting, chunks[1]);
    } else {
        render_entry_list(f, app, chunks[1]);
    }

    let footer_text = if let Some(notice) = &app.notice {
        notice.clone()
    } else if app.phase == Phase::Listing {
        "请稍候 | q 退出".to_string()
    } else {
        format!(
            "已选 {}/{} | Space 勾选 | a 全选 | Enter 安装 | r 刷新 | q 退出",
            app.marked.len(),
            app.catalog.len()
        )
    };
    layout::render_footer(f, &footer_text, chunks[2]);
}

fn render_entry_list(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Available Software Updates ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));
    let inner = block.inner(area).inner(Margin {
        horizontal: 1,
        vertical: 0,
    });
    f.render_widget(block, area);

    if app.catalog.is_empty() {
        let empty = Paragraph::new("太好了！没有发现可用更新。")
            .style(Style::default().fg(DIM))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: false });
        f.render_widget(empty, inner);
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    let all_box = if app.all_marked() { "[x]" } else { "[ ]" };
    lines.push(Line::from(Span::styled(
        format!("{} 全选 (a)", all_box),
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(""));

    // 保证光标行可见
    let visible = (inner.height as usize).saturating_sub(2).max(1);
    let offset = app.selected.saturating_sub(visible - 1);

    for (i, entry) in app
        .catalog
        .entries
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
    {
        let is_cursor = i == app.selected;
        let checkbox = if app.marked.contains(&entry.identifier) {
            "[x]"
        } else {
            "[ ]"
        };
        let base = if is_cursor {
            Style::default().bg(SEL_BG)
        } else {
            Style::default()
        };

        let mut spans = vec![
            Span::styled(
                format!("{} {} ", if is_cursor { "▶" } else { " " }, checkbox),
                base.fg(ACCENT),
            ),
            Span::styled(
                entry.display_name.clone(),
                base.fg(BRIGHT_WHITE).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  v{}", entry.version), base.fg(DIM)),
        ];
        if let Some(platform) = &entry.platform {
            spans.push(Span::styled(format!(" {}", platform), base.fg(DIM)));
        }
        if let Some(size) = entry.size_bytes {
            spans.push(Span::styled(
                format!("  {}", layout::format_size(size)),
                base.fg(Color::Yellow),
            ));
        }
        spans.push(Span::styled(format!("  ({})", entry.identifier), base.fg(DIM)));
        lines.push(Line::from(spans));
    }

    f.render_widget(Paragraph::new(lines), inner);
}

/// 渲染列表失败界面
pub fn render_error(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    layout::render_header(f, &format!("{} | ❌ 错误", app.config.title), chunks[0]);

    let message = app
        .error_message
        .clone()
        .unwrap_or_else(|| "发生未知错误".to_string());
    let body = Paragraph::new(message)
        .style(Style::default().fg(Color::Red))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(body, chunks[1]);

    layout::render_footer(f, "r 重试 | q 退出", chunks[2]);
}
