//! RemoteUpdateManager 相关数据类型定义

use crate::error::SelectionError;
use chrono::{DateTime, Local};
use std::collections::{HashSet, VecDeque};

/// 一个可安装的更新条目（来自 `--action=list`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    /// SAP 代码，例如 `PHSP`，安装时原样传回 RUM
    pub identifier: String,
    pub display_name: String,
    pub version: String,
    pub platform: Option<String>,
    pub size_bytes: Option<u64>,
}

/// 最近一次列出的更新集合
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Catalog {
    pub entries: Vec<UpdateEntry>,
    /// 每次成功列出后递增，用于判断选择是否过期
    pub revision: u64,
}

impl Catalog {
    pub fn new(entries: Vec<UpdateEntry>, revision: u64) -> Self {
        Self { entries, revision }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, identifier: &str) -> Option<&UpdateEntry> {
        self.entries.iter().find(|e| e.identifier == identifier)
    }

    /// 从当前目录构建选择；空选择或未知标识符都会被拒绝
    pub fn select<I, S>(&self, identifiers: I) -> Result<Selection, SelectionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut picked = Vec::new();
        for id in identifiers {
            let id = id.as_ref();
            if self.get(id).is_none() {
                return Err(SelectionError::Unknown(id.to_string()));
            }
            if seen.insert(id.to_string()) {
                picked.push(id.to_string());
            }
        }
        if picked.is_empty() {
            return Err(SelectionError::Empty);
        }
        let covers_all = picked.len() == self.entries.len();
        Ok(Selection {
            identifiers: picked,
            revision: self.revision,
            covers_all,
        })
    }

    /// 选择是否仍然对应当前目录（刷新后旧选择失效）
    pub fn is_current(&self, selection: &Selection) -> bool {
        selection.revision == self.revision
            && selection.identifiers.iter().all(|id| self.get(id).is_some())
    }
}

/// 用户选中的一组更新
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    identifiers: Vec<String>,
    revision: u64,
    covers_all: bool,
}

impl Selection {
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// 是否覆盖整个目录（此时不传 `--productVersions`，交给 RUM 全部安装）
    pub fn covers_all(&self) -> bool {
        self.covers_all
    }
}

/// 运行结束时的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        message: String,
    },
    /// 部分更新已安装，但 RUM 返回了非零状态
    PartialFailure {
        exit_code: i32,
        installed: Vec<String>,
        diagnostics: Vec<String>,
    },
    Failure {
        /// 被信号终止时为 None
        exit_code: Option<i32>,
        diagnostics: Vec<String>,
    },
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Runner 通过 channel 发送给前台的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// percent 为 None 表示不确定进度
    Progress {
        percent: Option<u8>,
        message: String,
    },
    Info(String),
    Installed {
        identifier: String,
        display_name: String,
        version: Option<String>,
    },
    /// 终止事件，每个会话恰好一次
    Finished(Outcome),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished(_))
    }
}

/// 保留在会话中的信息行上限
const MAX_SESSION_LINES: usize = 500;

/// 一次 `--action=install` 调用的状态
#[derive(Debug, Clone)]
pub struct RunSession {
    pub selection: Vec<String>,
    pub progress: Option<u8>,
    pub status: String,
    pub installed: Vec<String>,
    pub lines: VecDeque<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    outcome: Option<Outcome>,
}

impl RunSession {
    pub fn new(selection: &Selection) -> Self {
        Self {
            selection: selection.identifiers().to_vec(),
            progress: None,
            status: "正在启动 RemoteUpdateManager...".to_string(),
            installed: Vec::new(),
            lines: VecDeque::new(),
            started_at: Local::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// 应用一个事件；终止后到达的事件一律丢弃，返回 false
    pub fn apply(&mut self, event: &RunEvent) -> bool {
        if self.outcome.is_some() {
            log::warn!("会话已结束，丢弃事件: {:?}", event);
            return false;
        }
        match event {
            RunEvent::Progress { percent, message } => {
                if let Some(p) = percent {
                    // 进度只增不减
                    let p = (*p).min(100);
                    if self.progress.map_or(true, |cur| p > cur) {
                        self.progress = Some(p);
                    }
                }
                // 纯百分比行不带文字，沿用当前状态；原地刷新的同一状态只记一行
                if !message.is_empty() && *message != self.status {
                    self.status = message.clone();
                    self.push_line(message.clone());
                }
            }
            RunEvent::Info(message) => {
                self.push_line(message.clone());
            }
            RunEvent::Installed {
                display_name,
                version,
                ..
            } => {
                let label = match version {
                    Some(v) => format!("{} (v{})", display_name, v),
                    None => display_name.clone(),
                };
                self.push_line(format!("✔ 已安装 {}", label));
                self.installed.push(label);
            }
            RunEvent::Finished(outcome) => {
                if outcome.is_success() {
                    self.progress = Some(100);
                }
                self.finished_at = Some(Local::now());
                self.outcome = Some(outcome.clone());
            }
        }
        true
    }

    fn push_line(&mut self, line: String) {
        if self.lines.len() >= MAX_SESSION_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> UpdateEntry {
        UpdateEntry {
            identifier: id.to_string(),
            display_name: id.to_string(),
            version: "1.0".to_string(),
            platform: None,
            size_bytes: None,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![entry("PHSP"), entry("ILST"), entry("AEFT")], 1)
    }

    #[test]
    fn test_select_rejects_empty() {
        let result = catalog().select(Vec::<String>::new());
        assert_eq!(result, Err(SelectionError::Empty));
    }

    #[test]
    fn test_select_rejects_unknown() {
        let result = catalog().select(["PHSP", "KBRG"]);
        assert_eq!(result, Err(SelectionError::Unknown("KBRG".to_string())));
    }

    #[test]
    fn test_select_dedups_and_keeps_order() {
        let sel = catalog().select(["ILST", "PHSP", "ILST"]).unwrap();
        assert_eq!(sel.identifiers(), &["ILST".to_string(), "PHSP".to_string()]);
        assert!(!sel.covers_all());
    }

    #[test]
    fn test_select_all_covers_catalog() {
        let sel = catalog().select(["AEFT", "ILST", "PHSP"]).unwrap();
        assert!(sel.covers_all());
    }

    #[test]
    fn test_selection_goes_stale_after_refresh() {
        let old = catalog();
        let sel = old.select(["PHSP"]).unwrap();
        assert!(old.is_current(&sel));

        let refreshed = Catalog::new(old.entries.clone(), 2);
        assert!(!refreshed.is_current(&sel));
    }

    #[test]
    fn test_session_progress_never_decreases() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        session.apply(&RunEvent::Progress { percent: Some(40), message: "a".into() });
        session.apply(&RunEvent::Progress { percent: Some(10), message: "b".into() });
        assert_eq!(session.progress, Some(40));
        assert_eq!(session.status, "b");
        session.apply(&RunEvent::Progress { percent: None, message: "c".into() });
        assert_eq!(session.progress, Some(40));
    }

    #[test]
    fn test_session_ignores_events_after_terminal() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        assert!(session.apply(&RunEvent::Finished(Outcome::Cancelled)));
        assert!(!session.apply(&RunEvent::Progress { percent: Some(90), message: "late".into() }));
        assert!(!session.apply(&RunEvent::Finished(Outcome::Success { message: "x".into() })));
        assert_eq!(session.outcome(), Some(&Outcome::Cancelled));
        assert_eq!(session.progress, None);
    }

    #[test]
    fn test_session_keeps_status_on_bare_percent() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        let initial = session.status.clone();
        session.apply(&RunEvent::Progress { percent: Some(10), message: String::new() });
        assert_eq!(session.progress, Some(10));
        assert_eq!(session.status, initial);
        assert!(session.lines.is_empty());
    }

    #[test]
    fn test_session_logs_repeated_status_once() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        for p in [5, 10, 15, 20] {
            session.apply(&RunEvent::Progress {
                percent: Some(p),
                message: "正在下载 Photoshop...".into(),
            });
        }
        session.apply(&RunEvent::Progress {
            percent: Some(50),
            message: "正在安装 Photoshop...".into(),
        });
        assert_eq!(
            session.lines.iter().cloned().collect::<Vec<_>>(),
            vec!["正在下载 Photoshop...".to_string(), "正在安装 Photoshop...".to_string()]
        );
        assert_eq!(session.progress, Some(50));
    }

    #[test]
    fn test_session_records_finish_time() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        assert!(session.finished_at.is_none());
        session.apply(&RunEvent::Finished(Outcome::Cancelled));
        let finished = session.finished_at.unwrap();
        assert!(finished >= session.started_at);
    }

    #[test]
    fn test_session_records_installed_products() {
        let sel = catalog().select(["PHSP"]).unwrap();
        let mut session = RunSession::new(&sel);
        session.apply(&RunEvent::Installed {
            identifier: "PHSP".into(),
            display_name: "Photoshop".into(),
            version: Some("25.0".into()),
        });
        assert_eq!(session.installed, vec!["Photoshop (v25.0)".to_string()]);
    }
}
