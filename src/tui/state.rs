use crate::config::Config;
use crate::error::{RunError, SelectionError, ToolError};
use crate::rum::{Catalog, RunHandle, Runner, Selection};
use std::collections::HashSet;
use std::time::{Duration, Instant};

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 正在执行 --action=list
    Listing,
    Selecting,
    Running,
    Summary,
    Error,
}

// ========== 事件 ==========

#[derive(Debug)]
pub enum AppEvent {
    CatalogLoaded(Catalog),
    ListingFailed(ToolError),
}

// ========== 应用状态 ==========

pub struct App {
    pub config: Config,
    pub runner: Runner,
    pub phase: Phase,
    pub catalog: Catalog,
    /// 光标所在行
    pub selected: usize,
    /// 已勾选的 SAP 代码
    pub marked: HashSet<String>,
    /// 刷新前的勾选，待新目录到达后校验
    carried: Option<Selection>,
    pub run: Option<RunHandle>,
    /// 临时提示（显示在 footer）
    pub notice: Option<String>,
    pub error_message: Option<String>,
    pub scroll: usize,
    /// 跟随最新输出滚动
    pub follow: bool,
    pub close_at: Option<Instant>,
    pub should_quit: bool,
}

impl App {
    pub fn new(config: Config, runner: Runner) -> Self {
        Self {
            config,
            runner,
            phase: Phase::Listing,
            catalog: Catalog::default(),
            selected: 0,
            marked: HashSet::new(),
            carried: None,
            run: None,
            notice: None,
            error_message: None,
            scroll: 0,
            follow: true,
            close_at: None,
            should_quit: false,
        }
    }

    // ===== 列表 =====

    /// 开始（重新）列出更新；选择界面中的勾选会带到新目录
    pub fn begin_listing(&mut self) {
        self.carried = if self.phase == Phase::Selecting {
            self.selection().ok()
        } else {
            None
        };
        self.phase = Phase::Listing;
        self.catalog = Catalog::default();
        self.marked.clear();
        self.selected = 0;
        self.run = None;
        self.notice = None;
        self.error_message = None;
        self.close_at = None;
        self.scroll = 0;
    }

    pub fn on_catalog_loaded(&mut self, catalog: Catalog) {
        self.catalog = catalog;
        self.marked.clear();
        self.selected = 0;
        self.phase = Phase::Selecting;
        self.notice = if self.catalog.is_empty() {
            Some("没有发现可用更新。若确有更新未显示，请以管理员权限 (sudo) 运行".to_string())
        } else {
            None
        };
        if let Some(previous) = self.carried.take() {
            self.restore_marks(&previous);
        }
    }

    /// 旧目录上的选择已过期，只保留新目录中仍存在的项
    fn restore_marks(&mut self, previous: &Selection) {
        let kept: Vec<&String> = if self.catalog.is_current(previous) {
            previous.identifiers().iter().collect()
        } else {
            previous
                .identifiers()
                .iter()
                .filter(|id| self.catalog.get(id).is_some())
                .collect()
        };
        let dropped = previous.len() - kept.len();
        self.marked = kept.into_iter().cloned().collect();
        if dropped > 0 {
            self.notice = Some(format!("更新列表已变化，{} 个已勾选的更新不再可用", dropped));
        }
    }

    pub fn on_listing_failed(&mut self, err: ToolError) {
        log::error!("列出更新失败: {}", err);
        let message = match &err {
            ToolError::NotFound { path } => format!(
                "找不到 RemoteUpdateManager ({})。请用 --rum-path 或配置文件中的 rum_path 指定路径",
                path.display()
            ),
            ToolError::NonZeroExit { output, .. } => {
                let last = output.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
                if last.is_empty() {
                    err.to_string()
                } else {
                    format!("{}: {}", err, last.trim())
                }
            }
            ToolError::Io(_) => err.to_string(),
        };
        self.error_message = Some(message);
        self.phase = Phase::Error;
    }

    // ===== 选择 =====

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        let max = self.catalog.len().saturating_sub(1);
        if self.selected < max {
            self.selected += 1;
        }
    }

    pub fn toggle_current(&mut self) {
        if let Some(entry) = self.catalog.entries.get(self.selected) {
            let id = entry.identifier.clone();
            if !self.marked.remove(&id) {
                self.marked.insert(id);
            }
        }
    }

    pub fn all_marked(&self) -> bool {
        !self.catalog.is_empty() && self.marked.len() == self.catalog.len()
    }

    /// 全选；已全选时取消全选
    pub fn toggle_all(&mut self) {
        if self.all_marked() {
            self.marked.clear();
        } else {
            self.marked = self
                .catalog
                .entries
                .iter()
                .map(|e| e.identifier.clone())
                .collect();
        }
    }

    /// 按目录顺序构建选择
    pub fn selection(&self) -> Result<Selection, SelectionError> {
        self.catalog.select(
            self.catalog
                .entries
                .iter()
                .filter(|e| self.marked.contains(&e.identifier))
                .map(|e| e.identifier.as_str()),
        )
    }

    // ===== 安装 =====

    pub fn start_install(&mut self) {
        let selection = match self.selection() {
            Ok(selection) => selection,
            Err(SelectionError::Empty) => {
                self.notice = Some("请至少选择一个更新".to_string());
                return;
            }
            Err(e) => {
                self.notice = Some(e.to_string());
                return;
            }
        };
        match self.runner.run(&selection) {
            Ok(handle) => {
                self.run = Some(handle);
                self.phase = Phase::Running;
                self.notice = None;
                self.scroll = 0;
                self.follow = true;
            }
            Err(RunError::AlreadyRunning) => {
                self.notice = Some("已有更新正在进行，请等待完成".to_string());
            }
            Err(e) => {
                log::error!("启动安装失败: {}", e);
                self.error_message = Some(format!("启动安装失败: {}", e));
                self.phase = Phase::Error;
            }
        }
    }

    pub fn cancel_install(&mut self) {
        if let Some(handle) = &self.run {
            if !handle.session().is_finished() {
                handle.cancel();
                self.notice = Some("正在取消...".to_string());
            }
        }
    }

    /// 每帧调用：收取后台事件，终止后切到结果页
    pub fn poll_run(&mut self) {
        let Some(handle) = self.run.as_mut() else {
            return;
        };
        for event in handle.drain() {
            log::trace!("事件: {:?}", event);
        }
        if self.follow {
            self.scroll = handle.session().lines.len();
        }
        if self.phase == Phase::Running && handle.session().is_finished() {
            self.phase = Phase::Summary;
            self.notice = None;
            self.scroll = 0;
            self.close_at = match self.config.auto_close_secs {
                0 => None,
                secs => Some(Instant::now() + Duration::from_secs(secs)),
            };
        }
    }

    /// 结果页自动关闭
    pub fn tick(&mut self, now: Instant) {
        if let Some(at) = self.close_at {
            if self.phase == Phase::Summary && now >= at {
                self.should_quit = true;
            }
        }
    }

    pub fn seconds_until_close(&self) -> Option<u64> {
        self.close_at
            .map(|at| at.saturating_duration_since(Instant::now()).as_secs())
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rum::parser::parse_list_output;
    use crate::rum::{RemoteUpdateManager, RunnerOptions};
    use std::path::PathBuf;

    fn app_with(path: PathBuf) -> App {
        let runner = Runner::new(RemoteUpdateManager::new(path), RunnerOptions::default());
        App::new(Config::default(), runner)
    }

    fn loaded_app() -> App {
        let mut app = app_with(PathBuf::from("/nonexistent/RemoteUpdateManager"));
        let entries = parse_list_output("(PHSP/25.0/64-bit)\n(ILST/28.1/64-bit)\n(KBRG/14.0)\n");
        app.on_catalog_loaded(Catalog::new(entries, 1));
        app
    }

    #[test]
    fn test_catalog_loaded_enters_selecting() {
        let app = loaded_app();
        assert_eq!(app.phase, Phase::Selecting);
        assert!(app.notice.is_none());
        assert!(app.marked.is_empty());
    }

    #[test]
    fn test_empty_catalog_suggests_privileges() {
        let mut app = app_with(PathBuf::from("/nonexistent"));
        app.on_catalog_loaded(Catalog::new(Vec::new(), 1));
        assert_eq!(app.phase, Phase::Selecting);
        assert!(app.notice.as_deref().unwrap().contains("sudo"));
    }

    #[test]
    fn test_listing_not_found_suggests_path() {
        let mut app = app_with(PathBuf::from("/nonexistent"));
        app.on_listing_failed(ToolError::NotFound { path: PathBuf::from("/nonexistent") });
        assert_eq!(app.phase, Phase::Error);
        assert!(app.error_message.as_deref().unwrap().contains("--rum-path"));
    }

    #[test]
    fn test_toggle_and_toggle_all() {
        let mut app = loaded_app();
        app.move_down();
        app.toggle_current();
        assert_eq!(app.selection().unwrap().identifiers(), &["ILST".to_string()]);

        app.toggle_all();
        assert!(app.all_marked());
        let sel = app.selection().unwrap();
        assert!(sel.covers_all());
        assert_eq!(sel.identifiers()[0], "PHSP");

        app.toggle_all();
        assert!(app.marked.is_empty());
    }

    #[test]
    fn test_cursor_stays_in_bounds() {
        let mut app = loaded_app();
        app.move_up();
        assert_eq!(app.selected, 0);
        for _ in 0..10 {
            app.move_down();
        }
        assert_eq!(app.selected, 2);
    }

    #[test]
    fn test_install_with_nothing_marked_shows_notice() {
        let mut app = loaded_app();
        app.start_install();
        assert_eq!(app.phase, Phase::Selecting);
        assert_eq!(app.notice.as_deref(), Some("请至少选择一个更新"));
        assert!(app.run.is_none());
    }

    #[test]
    fn test_install_with_missing_tool_shows_error() {
        let mut app = loaded_app();
        app.toggle_current();
        app.start_install();
        assert_eq!(app.phase, Phase::Error);
        assert!(!app.runner.is_running());
    }

    #[test]
    fn test_refresh_keeps_marks_still_available() {
        let mut app = loaded_app();
        app.toggle_all();
        app.begin_listing();

        let entries = parse_list_output("(PHSP/25.1/64-bit)\n(KBRG/14.0)\n(AEFT/24.0)\n");
        app.on_catalog_loaded(Catalog::new(entries, 2));

        let ids = app.selection().unwrap().identifiers().to_vec();
        assert_eq!(ids, vec!["PHSP".to_string(), "KBRG".to_string()]);
        assert!(app.notice.as_deref().unwrap().contains("1 个"));
    }

    #[test]
    fn test_refresh_after_summary_starts_clean() {
        let mut app = loaded_app();
        app.toggle_all();
        app.phase = Phase::Summary;
        app.begin_listing();
        app.on_catalog_loaded(Catalog::new(
            parse_list_output("(PHSP/25.1/64-bit)\n"),
            2,
        ));
        assert!(app.marked.is_empty());
        assert!(app.notice.is_none());
    }

    #[test]
    fn test_begin_listing_resets_selection() {
        let mut app = loaded_app();
        app.toggle_all();
        app.begin_listing();
        assert_eq!(app.phase, Phase::Listing);
        assert!(app.marked.is_empty());
        assert!(app.catalog.is_empty());
    }
}
