//! 流式安装（`--action=install`）
//!
//! 每个会话一个后台线程：阻塞读取子进程合并后的 stdout/stderr，
//! 分类为事件后经单消费者 channel 按序送到前台，最后恰好发送一次
//! `RunEvent::Finished`。

use super::parser::{clean_terminal_output, classify_line, product_name, LineClass};
use super::types::{Outcome, RunEvent, RunSession, Selection};
use super::RemoteUpdateManager;
use crate::error::{RunError, SelectionError, ToolError};
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 失败时附带的输出尾部行数
const DIAGNOSTIC_TAIL: usize = 40;

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// SIGTERM 之后等待多久再发 SIGKILL
    pub cancel_grace: Duration,
    /// 视为“已是最新”的退出码
    pub up_to_date_exit_codes: Vec<i32>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(5),
            up_to_date_exit_codes: Vec::new(),
        }
    }
}

/// 更新执行器；同一时间最多一个会话
#[derive(Debug, Clone)]
pub struct Runner {
    rum: RemoteUpdateManager,
    options: RunnerOptions,
    active: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(rum: RemoteUpdateManager, options: RunnerOptions) -> Self {
        Self {
            rum,
            options,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn rum(&self) -> &RemoteUpdateManager {
        &self.rum
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 启动一次安装会话
    ///
    /// 空选择和并发调用在启动任何进程之前就被拒绝；找不到 RUM 同步返回
    /// `ToolError::NotFound`。此后的一切失败都只通过终止事件体现。
    pub fn run(&self, selection: &Selection) -> Result<RunHandle, RunError> {
        if selection.is_empty() {
            return Err(SelectionError::Empty.into());
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("已有会话在运行，拒绝新的安装请求");
            return Err(RunError::AlreadyRunning);
        }

        match self.spawn(selection) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn spawn(&self, selection: &Selection) -> Result<RunHandle, ToolError> {
        use std::os::unix::process::CommandExt;

        let args = self.rum.install_args(selection);
        log::info!("执行 {} {}", self.rum.path().display(), args.join(" "));

        // stdout 与 stderr 共用一根管道，保持子进程写入的先后顺序
        let (reader, writer) = std::io::pipe()?;
        let mut cmd = Command::new(self.rum.path());
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(writer.try_clone()?);
        cmd.stderr(writer);
        // 独立进程组，取消时统一处理 RUM 及其子进程；
        // 不随调用线程退出，前台退出时由 RunHandle::shutdown 收尾
        cmd.process_group(0);
        let child = cmd
            .spawn()
            .map_err(|e| ToolError::from_spawn(e, self.rum.path()))?;
        // 释放父进程持有的写端，否则读线程永远等不到 EOF
        drop(cmd);

        let cancel = CancelHandle {
            inner: Arc::new(CancelState {
                pid: child.id(),
                grace: self.options.cancel_grace,
                requested: AtomicBool::new(false),
                finished: AtomicBool::new(false),
            }),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = OutputTracker::new(selection.len());
        let worker = Worker {
            child,
            tracker,
            tx,
            cancel: cancel.clone(),
            active: Arc::clone(&self.active),
            up_to_date_exit_codes: self.options.up_to_date_exit_codes.clone(),
        };
        std::thread::spawn(move || worker.run(reader));

        Ok(RunHandle {
            session: RunSession::new(selection),
            events: rx,
            cancel,
        })
    }
}

// ========== 会话句柄 ==========

/// 一次安装会话的事件流和状态；事件流有限、不可重启
pub struct RunHandle {
    session: RunSession,
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancelHandle,
}

impl RunHandle {
    pub fn session(&self) -> &RunSession {
        &self.session
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 取出当前已到达的全部事件并应用到会话（不阻塞）
    pub fn drain(&mut self) -> Vec<RunEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if self.session.apply(&event) {
                out.push(event);
            }
        }
        out
    }

    /// 阻塞等待下一个事件（不可在异步运行时内调用）
    pub fn blocking_next(&mut self) -> Option<RunEvent> {
        let event = self.events.blocking_recv()?;
        self.session.apply(&event).then_some(event)
    }

    /// 退出程序前调用：取消并等待终止事件，最多等待 `timeout`
    pub fn shutdown(&mut self, timeout: Duration) {
        if self.session.is_finished() {
            return;
        }
        self.cancel();
        let deadline = Instant::now() + timeout;
        while !self.session.is_finished() && Instant::now() < deadline {
            self.drain();
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

// ========== 取消 ==========

#[derive(Debug)]
struct CancelState {
    pid: u32,
    grace: Duration,
    requested: AtomicBool,
    finished: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

impl CancelHandle {
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// 请求取消当前会话。
    ///
    /// 两阶段（针对整个进程组）：
    ///   1. SIGTERM：让 RUM 自行收尾退出
    ///   2. SIGKILL：宽限期结束后进程组仍在则强制终止
    ///
    /// 重复调用无效。
    pub fn cancel(&self) {
        if self.inner.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.finished.load(Ordering::SeqCst) {
            return;
        }
        let pid = self.inner.pid;
        log::info!("取消安装：向进程组 {} 发送 SIGTERM", pid);
        signal_group(pid, libc::SIGTERM);

        // 在后台线程中等待宽限期，避免阻塞 TUI
        let inner = Arc::clone(&self.inner);
        std::thread::spawn(move || {
            let deadline = Instant::now() + inner.grace;
            while Instant::now() < deadline {
                if inner.finished.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            if !inner.finished.load(Ordering::SeqCst) && group_alive(pid) {
                log::warn!("进程组 {} 在宽限期内未退出，发送 SIGKILL", pid);
                signal_group(pid, libc::SIGKILL);
            }
        });
    }
}

fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

// ========== 后台读取 ==========

struct Worker {
    child: Child,
    tracker: OutputTracker,
    tx: mpsc::UnboundedSender<RunEvent>,
    cancel: CancelHandle,
    active: Arc<AtomicBool>,
    up_to_date_exit_codes: Vec<i32>,
}

impl Worker {
    fn run(mut self, mut reader: impl Read) {
        let read_error = self.pump(&mut reader);
        drop(reader);

        if read_error.is_some() {
            // 读不下去了，子进程可能阻塞在写管道上
            signal_group(self.child.id(), libc::SIGKILL);
        }

        let status = self.child.wait();
        self.cancel.inner.finished.store(true, Ordering::SeqCst);

        let outcome = settle(
            self.tracker,
            self.cancel.is_requested(),
            status,
            read_error,
            &self.up_to_date_exit_codes,
        );

        // 先释放会话占用，再发送终止事件，前台收到后即可重新发起
        self.active.store(false, Ordering::SeqCst);
        let _ = self.tx.send(RunEvent::Finished(outcome));
    }

    /// 逐块读取，按 `\n` / `\r` 切行（RUM 的进度可能以 `\r` 就地刷新）
    fn pump(&mut self, reader: &mut impl Read) -> Option<std::io::Error> {
        let mut buffer = [0u8; 4096];
        let mut line_buffer: Vec<u8> = Vec::new();

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    for &b in &buffer[..n] {
                        if b == b'\n' || b == b'\r' {
                            self.emit_line(&line_buffer);
                            line_buffer.clear();
                        } else {
                            line_buffer.push(b);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("读取 RemoteUpdateManager 输出失败: {}", e);
                    self.emit_line(&line_buffer);
                    return Some(e);
                }
            }
        }
        self.emit_line(&line_buffer);
        None
    }

    fn emit_line(&mut self, raw: &[u8]) {
        let line = clean_terminal_output(&String::from_utf8_lossy(raw));
        if line.is_empty() {
            return;
        }
        log::debug!("RUM: {}", line);
        for event in self.tracker.feed(&line) {
            // 前台已放弃接收时继续读完输出，免得子进程写管道阻塞
            let _ = self.tx.send(event);
        }
    }
}

/// 汇总子进程退出状态得到最终结果
///
/// 取消请求只在进程确实被信号终止或非零退出时生效；RUM 已正常退出后
/// 才到达的取消请求不改变结果。
fn settle(
    tracker: OutputTracker,
    cancelled: bool,
    status: std::io::Result<ExitStatus>,
    read_error: Option<std::io::Error>,
    up_to_date_exit_codes: &[i32],
) -> Outcome {
    match (status, read_error) {
        (Ok(status), None) if cancelled && !status.success() => {
            log::info!("安装已取消");
            Outcome::Cancelled
        }
        (Ok(status), None) => {
            log::info!("RemoteUpdateManager 退出: {:?}", status.code());
            tracker.finish(status.code(), up_to_date_exit_codes)
        }
        _ if cancelled => {
            log::info!("安装已取消");
            Outcome::Cancelled
        }
        (Ok(status), Some(e)) => tracker.fail(status.code(), &e),
        (Err(e), _) => tracker.fail(None, &e),
    }
}

// ========== 输出状态跟踪 ==========

/// 把分类后的输出行折算成事件，并在结束时给出最终结果
#[derive(Debug)]
pub struct OutputTracker {
    selected: usize,
    installed: Vec<String>,
    current_percent: u8,
    overall: u8,
    status: String,
    reported_code: Option<i32>,
    up_to_date: bool,
    tail: VecDeque<String>,
}

impl OutputTracker {
    pub fn new(selected: usize) -> Self {
        Self {
            selected: selected.max(1),
            installed: Vec::new(),
            current_percent: 0,
            overall: 0,
            status: String::new(),
            reported_code: None,
            up_to_date: false,
            tail: VecDeque::new(),
        }
    }

    /// 总进度：已完成产品 + 当前产品进度，只增不减
    fn recompute_overall(&mut self) -> u8 {
        let done = self.installed.len() * 100 + self.current_percent as usize;
        let value = (done / self.selected).min(100) as u8;
        self.overall = self.overall.max(value);
        self.overall
    }

    pub fn feed(&mut self, line: &str) -> Vec<RunEvent> {
        if self.tail.len() >= DIAGNOSTIC_TAIL {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());

        let Some(class) = classify_line(line) else {
            log::debug!("无法识别的输出行，已忽略: {}", line);
            return Vec::new();
        };

        match class {
            LineClass::Progress { percent, message } => {
                if let Some(message) = message {
                    // 新的产品开始
                    if message != self.status {
                        self.current_percent = 0;
                    }
                    self.status = message;
                }
                let percent = percent.map(|p| {
                    self.current_percent = p;
                    self.recompute_overall()
                });
                vec![RunEvent::Progress {
                    percent,
                    message: self.status.clone(),
                }]
            }
            LineClass::Installed {
                identifier,
                version,
            } => {
                let display_name = product_name(&identifier);
                self.installed.push(identifier.clone());
                self.current_percent = 0;
                let overall = self.recompute_overall();
                self.status = format!("已安装 {}", display_name);
                vec![
                    RunEvent::Installed {
                        identifier,
                        display_name,
                        version,
                    },
                    RunEvent::Progress {
                        percent: Some(overall),
                        message: self.status.clone(),
                    },
                ]
            }
            LineClass::ReturnCode(code) => {
                self.reported_code = Some(code);
                vec![RunEvent::Info(line.to_string())]
            }
            LineClass::UpToDate(text) => {
                self.up_to_date = true;
                vec![RunEvent::Info(text)]
            }
            LineClass::Info(text) => vec![RunEvent::Info(text)],
        }
    }

    /// 根据退出码给出最终结果；RUM 打印的 `Return Code (N)` 优先于进程退出码
    pub fn finish(self, exit_code: Option<i32>, up_to_date_exit_codes: &[i32]) -> Outcome {
        let code = self.reported_code.or(exit_code);
        match code {
            Some(0) => {
                let message = if self.up_to_date {
                    "已是最新".to_string()
                } else if self.installed.is_empty() {
                    "没有安装任何更新".to_string()
                } else {
                    format!("已安装 {} 个更新", self.installed.len())
                };
                Outcome::Success { message }
            }
            Some(c) if up_to_date_exit_codes.contains(&c) => Outcome::Success {
                message: "已是最新".to_string(),
            },
            // 部分成功无法从退出码判断，只能按失败处理并附上完整诊断
            Some(c) if !self.installed.is_empty() => Outcome::PartialFailure {
                exit_code: c,
                installed: self.installed,
                diagnostics: self.tail.into_iter().collect(),
            },
            other => Outcome::Failure {
                exit_code: other,
                diagnostics: self.tail.into_iter().collect(),
            },
        }
    }

    fn fail(self, exit_code: Option<i32>, err: &std::io::Error) -> Outcome {
        let mut diagnostics: Vec<String> = self.tail.into_iter().collect();
        diagnostics.push(format!("读取输出失败: {}", err));
        Outcome::Failure {
            exit_code,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn percents(events: &[RunEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress { percent, .. } => *percent,
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_tracker_single_product_scenario() {
        let mut tracker = OutputTracker::new(1);
        let mut events = Vec::new();
        for line in ["Downloading App A 10%", "Downloading App A 55%", "Installed App A"] {
            events.extend(tracker.feed(line));
        }
        assert_eq!(percents(&events), vec![10, 55, 100]);
        assert!(events.iter().any(|e| matches!(e, RunEvent::Installed { identifier, .. } if identifier == "App A")));
        assert_eq!(
            tracker.finish(Some(0), &[]),
            Outcome::Success { message: "已安装 1 个更新".to_string() }
        );
    }

    #[test]
    fn test_tracker_overall_progress_across_products() {
        let mut tracker = OutputTracker::new(2);
        let mut events = Vec::new();
        for line in [
            "*** Downloading (PHSP/25.0/64-bit)",
            "Progress: 50%",
            "Progress: 100%",
            "*** Successfully installed (PHSP/25.0/64-bit)",
            "*** Downloading (ILST/28.1/64-bit)",
            "Progress: 20%",
        ] {
            events.extend(tracker.feed(line));
        }
        assert_eq!(percents(&events), vec![25, 50, 50, 60]);
        let last = events.last().unwrap();
        assert_eq!(
            last,
            &RunEvent::Progress { percent: Some(60), message: "正在下载 Illustrator...".to_string() }
        );
    }

    #[test]
    fn test_tracker_unrecognized_lines_produce_no_events() {
        let mut tracker = OutputTracker::new(1);
        assert!(tracker.feed("random chatter").is_empty());
        // 但仍保留在诊断尾部
        match tracker.finish(Some(7), &[]) {
            Outcome::Failure { exit_code, diagnostics } => {
                assert_eq!(exit_code, Some(7));
                assert_eq!(diagnostics, vec!["random chatter".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_tracker_reported_code_takes_precedence() {
        let mut tracker = OutputTracker::new(1);
        tracker.feed("RemoteUpdateManager exiting with Return Code (1)");
        assert!(matches!(
            tracker.finish(Some(0), &[]),
            Outcome::Failure { exit_code: Some(1), .. }
        ));
    }

    #[test]
    fn test_tracker_partial_failure() {
        let mut tracker = OutputTracker::new(2);
        tracker.feed("*** Successfully installed (PHSP/25.0/64-bit)");
        tracker.feed("Error: failed to install (ILST/28.1)");
        match tracker.finish(Some(2), &[]) {
            Outcome::PartialFailure { exit_code, installed, diagnostics } => {
                assert_eq!(exit_code, 2);
                assert_eq!(installed, vec!["PHSP".to_string()]);
                assert_eq!(diagnostics.len(), 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_tracker_up_to_date() {
        let mut tracker = OutputTracker::new(1);
        tracker.feed("No new applicable Updates. Seems to be on the latest version");
        assert_eq!(
            tracker.finish(Some(0), &[]),
            Outcome::Success { message: "已是最新".to_string() }
        );

        let tracker = OutputTracker::new(1);
        assert_eq!(
            tracker.finish(Some(4), &[4]),
            Outcome::Success { message: "已是最新".to_string() }
        );
    }

    #[test]
    fn test_tracker_killed_by_signal_is_failure() {
        let tracker = OutputTracker::new(1);
        assert!(matches!(
            tracker.finish(None, &[]),
            Outcome::Failure { exit_code: None, .. }
        ));
    }

    #[test]
    fn test_tracker_diagnostic_tail_is_bounded() {
        let mut tracker = OutputTracker::new(1);
        for i in 0..100 {
            tracker.feed(&format!("line {}", i));
        }
        match tracker.finish(Some(1), &[]) {
            Outcome::Failure { diagnostics, .. } => {
                assert_eq!(diagnostics.len(), DIAGNOSTIC_TAIL);
                assert_eq!(diagnostics.last().unwrap(), "line 99");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    fn installed_one() -> OutputTracker {
        let mut tracker = OutputTracker::new(1);
        tracker.feed("Installed App A");
        tracker
    }

    #[test]
    fn test_settle_late_cancel_keeps_clean_exit() {
        let outcome = settle(installed_one(), true, Ok(ExitStatus::from_raw(0)), None, &[]);
        assert_eq!(
            outcome,
            Outcome::Success { message: "已安装 1 个更新".to_string() }
        );
    }

    #[test]
    fn test_settle_cancel_after_signal_or_error_exit() {
        // 原始等待状态：低 7 位为信号编号，退出码在高 8 位
        let killed = ExitStatus::from_raw(libc::SIGTERM);
        assert_eq!(
            settle(installed_one(), true, Ok(killed), None, &[]),
            Outcome::Cancelled
        );
        let failed = ExitStatus::from_raw(1 << 8);
        assert_eq!(
            settle(installed_one(), true, Ok(failed), None, &[]),
            Outcome::Cancelled
        );
    }

    #[test]
    fn test_settle_without_cancel_maps_exit_code() {
        let failed = ExitStatus::from_raw(2 << 8);
        assert!(matches!(
            settle(installed_one(), false, Ok(failed), None, &[]),
            Outcome::PartialFailure { exit_code: 2, .. }
        ));
    }
}
