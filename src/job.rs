//! ジョブコントロール: プロセスグループの追跡、ターミナル制御の受け渡し、子プロセスの reap。
//!
//! ## 構成
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`ChildEvent`] | 子プロセスの状態変化通知。[`signal`](crate::signal) のリスナースレッドが送る |
//! | [`ProcessGroup`] | 1 パイプライン分のプロセスグループ（pgid と pid 列） |
//! | [`JobTable`] | 追跡中のジョブ一覧 |
//! | [`Terminal`] | `tcsetpgrp` によるターミナル所有権の受け渡し |
//! | [`JobControl`] | 上記を束ねる管理オブジェクト。[`Shell`](crate::shell::Shell) が所有する |
//!
//! ## 状態遷移
//!
//! 起動 → フォアグラウンド（ターミナルを渡して [`JobControl::wait_foreground`] で待機）
//! または バックグラウンド（監視スレッドに委ねて即座に返る）→ 全プロセス reap → 完了。
//!
//! 子プロセスの通知はチャネル経由でディスパッチャスレッドが受け取り、ジョブテーブルに反映する。
//! 起動側はプロセス生成から登録までテーブルのロックを保持するため、
//! 登録前の pid に対する通知が先に処理されることはない。

use std::io;
use std::os::fd::RawFd;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use libc::pid_t;
use thiserror::Error;

use crate::compiler::CompileError;
use crate::error::ShellError;

// ── 子プロセス通知 ───────────────────────────────────────────────────

/// `waitpid` が報告する子プロセスの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// 正常終了。終了コード。
    Exited(i32),
    /// シグナルで終了。シグナル番号。
    Signaled(i32),
    /// 停止（SIGTSTP 等）。シグナル番号。
    Stopped(i32),
    /// SIGCONT で再開。
    Continued,
}

impl ChildStatus {
    /// `waitpid` の raw status を解釈する。
    pub fn from_raw(raw: i32) -> Option<Self> {
        if libc::WIFEXITED(raw) {
            Some(Self::Exited(libc::WEXITSTATUS(raw)))
        } else if libc::WIFSIGNALED(raw) {
            Some(Self::Signaled(libc::WTERMSIG(raw)))
        } else if libc::WIFSTOPPED(raw) {
            Some(Self::Stopped(libc::WSTOPSIG(raw)))
        } else if libc::WIFCONTINUED(raw) {
            Some(Self::Continued)
        } else {
            None
        }
    }

    /// シェルの終了ステータスに換算する（シグナル終了は 128 + シグナル番号）。
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(sig) | Self::Stopped(sig) => 128 + sig,
            Self::Continued => 0,
        }
    }
}

/// 子プロセス 1 つの状態変化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEvent {
    pub pid: pid_t,
    pub status: ChildStatus,
}

// ── ProcessGroup ─────────────────────────────────────────────────────

/// 1 パイプライン分のプロセス。最初に起動した pid がそのまま pgid になる。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessGroup {
    pids: Vec<pid_t>,
}

impl ProcessGroup {
    /// プロセスグループ ID。まだ何も起動していなければ `None`。
    pub fn pgid(&self) -> Option<pid_t> {
        self.pids.first().copied()
    }

    /// 次のステージを起動するときに `posix_spawnattr_setpgroup` へ渡す値。
    pub fn spawn_pgid(&self) -> pid_t {
        self.pgid().unwrap_or(0)
    }

    pub fn push(&mut self, pid: pid_t) {
        self.pids.push(pid);
    }

    pub fn pids(&self) -> &[pid_t] {
        &self.pids
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

// ── JobTable ─────────────────────────────────────────────────────────

/// ジョブ内の個別プロセスの状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    Running,
    Stopped,
    Finished(ChildStatus),
}

#[derive(Debug)]
struct JobProcess {
    pid: pid_t,
    state: ProcState,
}

/// ジョブの集約状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    /// いずれかのプロセスが停止中。
    Stopped,
    /// 全プロセスが reap 済み。引数は最終ステージの終了ステータス。
    Done(i32),
}

/// 待機側に届くジョブの結末。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// 全プロセス終了。最終ステージの終了ステータス。
    Done(i32),
    /// いずれかのプロセスが停止した。ジョブはテーブルに残る。
    Stopped,
}

/// パイプライン 1 本に対応するジョブ。
#[derive(Debug)]
pub struct Job {
    /// `[N]` 形式で表示されるジョブ番号。
    pub id: usize,
    pub pgid: pid_t,
    /// 表示用コマンド文字列。
    pub command: String,
    processes: Vec<JobProcess>,
    /// ターミナルを渡したジョブか。
    foreground: bool,
    /// 完了・停止を待っている側への通知口。一度送ったら外す。
    notify: Option<Sender<JobOutcome>>,
}

impl Job {
    /// 判定優先度: Stopped > Done > Running。
    pub fn status(&self) -> JobStatus {
        if self.processes.iter().any(|p| p.state == ProcState::Stopped) {
            return JobStatus::Stopped;
        }
        let mut last = None;
        for proc in &self.processes {
            match proc.state {
                ProcState::Finished(status) => last = Some(status),
                _ => return JobStatus::Running,
            }
        }
        JobStatus::Done(last.map_or(0, ChildStatus::exit_code))
    }
}

/// 追跡中のジョブ一覧。
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    /// ジョブを追加し、最小未使用のジョブ番号を返す。
    fn insert(
        &mut self,
        group: &ProcessGroup,
        command: &str,
        foreground: bool,
        notify: Option<Sender<JobOutcome>>,
    ) -> usize {
        let id = (1..)
            .find(|id| !self.jobs.iter().any(|j| j.id == *id))
            .unwrap_or(1);
        self.jobs.push(Job {
            id,
            pgid: group.spawn_pgid(),
            command: command.to_string(),
            processes: group
                .pids()
                .iter()
                .map(|&pid| JobProcess { pid, state: ProcState::Running })
                .collect(),
            foreground,
            notify,
        });
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 通知をジョブに反映する。完了したジョブはテーブルから取り除く。
    fn apply(&mut self, event: ChildEvent) {
        let Some(index) = self
            .jobs
            .iter()
            .position(|j| j.processes.iter().any(|p| p.pid == event.pid))
        else {
            tracing::debug!(pid = event.pid, status = ?event.status, "event for untracked child");
            return;
        };

        let job = &mut self.jobs[index];
        let before = job.status();
        if let Some(proc) = job.processes.iter_mut().find(|p| p.pid == event.pid) {
            proc.state = match event.status {
                ChildStatus::Stopped(_) => ProcState::Stopped,
                ChildStatus::Continued => ProcState::Running,
                finished => ProcState::Finished(finished),
            };
        }
        // ターミナル受け渡し前に端末を読もうとして止まったもの。直後の SIGCONT で再開する
        let transient_stop = job.foreground
            && matches!(event.status, ChildStatus::Stopped(sig) if sig == libc::SIGTTIN || sig == libc::SIGTTOU);
        let after = job.status();
        tracing::debug!(job = job.id, pgid = job.pgid, pid = event.pid, ?after, "child state changed");

        match after {
            JobStatus::Done(code) => {
                let job = self.jobs.remove(index);
                if let Some(tx) = job.notify {
                    let _ = tx.send(JobOutcome::Done(code));
                }
            }
            JobStatus::Stopped if before != JobStatus::Stopped && !transient_stop => {
                if let Some(tx) = job.notify.take() {
                    let _ = tx.send(JobOutcome::Stopped);
                }
            }
            _ => {}
        }
    }
}

// ── ターミナル制御 ───────────────────────────────────────────────────

/// ターミナルのフォアグラウンドプロセスグループを切り替える。
pub trait Terminal: Send + Sync {
    /// ターミナルを `pgid` に渡す。
    fn hand_to(&self, pgid: pid_t) -> io::Result<()>;
    /// ターミナルをシェル自身のプロセスグループに戻す。何度呼んでもよい。
    fn reclaim(&self) -> io::Result<()>;

    /// `pgid` に属するプロセスがまだ存在するか（回収済みなら `false`）。
    fn group_alive(&self, pgid: pid_t) -> bool {
        if unsafe { libc::kill(-pgid, 0) } == 0 {
            return true;
        }
        io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

/// 制御端末に対する `tcsetpgrp` 実装。
#[derive(Debug)]
pub struct Tty {
    fd: RawFd,
    shell_pgid: pid_t,
}

impl Tty {
    /// シェルを自身のプロセスグループリーダーにし、ターミナルを掌握する。
    ///
    /// `fd` が端末でなければエラー（非対話実行）。
    pub fn claim(fd: RawFd) -> io::Result<Self> {
        if unsafe { libc::isatty(fd) } == 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe {
            // セッションリーダーなら EPERM になるが、その場合は既にリーダー
            if libc::setpgid(0, 0) != 0 {
                tracing::debug!(error = %io::Error::last_os_error(), "setpgid on shell failed");
            }
        }
        let tty = Self {
            fd,
            shell_pgid: unsafe { libc::getpgrp() },
        };
        tty.reclaim()?;
        Ok(tty)
    }

    pub fn shell_pgid(&self) -> pid_t {
        self.shell_pgid
    }

    fn set_foreground(&self, pgid: pid_t) -> io::Result<()> {
        if unsafe { libc::tcsetpgrp(self.fd, pgid) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Terminal for Tty {
    /// ターミナルを渡したあとグループに SIGCONT を送る。
    /// 受け渡し前に端末を読んで SIGTTIN で止まった子を再開させるため。
    fn hand_to(&self, pgid: pid_t) -> io::Result<()> {
        self.set_foreground(pgid)?;
        unsafe {
            libc::kill(-pgid, libc::SIGCONT);
        }
        Ok(())
    }

    fn reclaim(&self) -> io::Result<()> {
        self.set_foreground(self.shell_pgid)
    }
}

/// 制御端末がない場合（`-c` 実行、パイプ入力）の実装。何もしない。
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

impl Terminal for Detached {
    fn hand_to(&self, _pgid: pid_t) -> io::Result<()> {
        Ok(())
    }

    fn reclaim(&self) -> io::Result<()> {
        Ok(())
    }
}

// ── JobControl ───────────────────────────────────────────────────────

/// ジョブ制御のエラー。起動済みのプロセスは停止させない。
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot hand the terminal to process group {pgid}: {source}")]
    Handoff {
        pgid: pid_t,
        #[source]
        source: io::Error,
    },
    #[error("cannot reclaim the terminal: {0}")]
    Reclaim(#[source] io::Error),
    #[error("a foreground job is already running")]
    ForegroundBusy,
    #[error("no foreground job to wait for")]
    NoForeground,
    #[error("child notification channel closed")]
    DispatcherGone,
}

/// パイプラインの実行モード。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Foreground,
    Background,
}

/// 起動結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launched {
    /// ターミナルを渡した。呼び出し側は [`JobControl::wait_foreground`] を呼ぶこと。
    Foreground { pgid: pid_t },
    /// バックグラウンドで実行中。
    Background { id: usize, pgid: pid_t },
}

#[derive(Debug, Default)]
struct State {
    table: JobTable,
    /// 現在のフォアグラウンドプロセスグループ。`None` ならシェル自身がフォアグラウンド。
    foreground: Option<pid_t>,
}

/// 待機中のフォアグラウンドジョブ。
#[derive(Debug)]
struct PendingForeground {
    id: usize,
    pgid: pid_t,
    command: String,
    done: Receiver<JobOutcome>,
}

/// ジョブ制御マネージャ。
pub struct JobControl {
    state: Arc<Mutex<State>>,
    terminal: Arc<dyn Terminal>,
    pending: Option<PendingForeground>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobControl {
    /// `events` を消費するディスパッチャスレッドを起動する。
    ///
    /// 送信側がすべて drop されるとディスパッチャは終了する。
    pub fn new(events: Receiver<ChildEvent>, terminal: Arc<dyn Terminal>) -> io::Result<Self> {
        let state = Arc::new(Mutex::new(State::default()));
        let shared = Arc::clone(&state);
        thread::Builder::new()
            .name("psh-dispatch".into())
            .spawn(move || {
                for event in events {
                    lock(&shared).table.apply(event);
                }
                tracing::debug!("child event channel closed");
            })?;
        Ok(Self {
            state,
            terminal,
            pending: None,
        })
    }

    /// 現在のフォアグラウンドプロセスグループ。
    pub fn foreground(&self) -> Option<pid_t> {
        lock(&self.state).foreground
    }

    /// 追跡中のジョブ数。
    pub fn job_count(&self) -> usize {
        lock(&self.state).table.len()
    }

    /// ジョブ番号からプロセスグループを引く。
    pub fn job_pgid(&self, id: usize) -> Option<pid_t> {
        lock(&self.state).table.get(id).map(|job| job.pgid)
    }

    /// ジョブテーブルのロックを保持したまま `spawn` でプロセスを起動し、ジョブとして登録する。
    ///
    /// `spawn` が途中で失敗した場合、起動済みのプロセスは停止させずに
    /// 監視なしのジョブとして登録し（reap だけは行う）、エラーをそのまま返す。
    pub fn launch<F>(&mut self, mode: LaunchMode, command: &str, spawn: F) -> Result<Launched, ShellError>
    where
        F: FnOnce(&mut ProcessGroup) -> Result<(), ShellError>,
    {
        if mode == LaunchMode::Foreground && self.pending.is_some() {
            return Err(JobError::ForegroundBusy.into());
        }

        let mut group = ProcessGroup::default();
        let mut state = lock(&self.state);
        let spawned = spawn(&mut group);

        let Some(pgid) = group.pgid() else {
            // 何も起動していない
            spawned?;
            return Err(CompileError::EmptyCommand.into());
        };

        if let Err(e) = spawned {
            let id = state.table.insert(&group, command, false, None);
            tracing::debug!(job = id, pgid, "partially launched pipeline left running");
            return Err(e);
        }

        let (tx, rx) = mpsc::channel();
        let foreground = mode == LaunchMode::Foreground;
        let id = state.table.insert(&group, command, foreground, Some(tx));

        match mode {
            LaunchMode::Background => {
                drop(state);
                supervise(id, pgid, command.to_string(), rx);
                Ok(Launched::Background { id, pgid })
            }
            LaunchMode::Foreground => {
                state.foreground = Some(pgid);
                drop(state);
                tracing::debug!(job = id, pgid, "handing terminal to foreground job");
                if let Err(source) = self.terminal.hand_to(pgid) {
                    if self.finished_before_handoff(id, pgid) {
                        // リスナーが先に回収した短命なジョブ。結果は通知チャネルに届く
                        tracing::debug!(job = id, pgid, error = %source, "job ended before terminal handoff");
                        return Ok(self.await_foreground(id, pgid, command, rx));
                    }
                    // プロセスは動かしたまま、バックグラウンドジョブとして扱う
                    let mut state = lock(&self.state);
                    state.foreground = None;
                    if let Some(job) = state.table.get_mut(id) {
                        job.foreground = false;
                    }
                    drop(state);
                    supervise(id, pgid, command.to_string(), rx);
                    return Err(JobError::Handoff { pgid, source }.into());
                }
                Ok(self.await_foreground(id, pgid, command, rx))
            }
        }
    }

    fn await_foreground(
        &mut self,
        id: usize,
        pgid: pid_t,
        command: &str,
        done: Receiver<JobOutcome>,
    ) -> Launched {
        self.pending = Some(PendingForeground {
            id,
            pgid,
            command: command.to_string(),
            done,
        });
        Launched::Foreground { pgid }
    }

    /// ジョブがテーブルから消えたか、グループのプロセスがすべて回収済みか。
    fn finished_before_handoff(&self, id: usize, pgid: pid_t) -> bool {
        let removed = lock(&self.state).table.get(id).is_none();
        removed || !self.terminal.group_alive(pgid)
    }

    /// フォアグラウンドジョブの完了または停止を待ち、ターミナルをシェルに戻す。
    pub fn wait_foreground(&mut self) -> Result<JobOutcome, JobError> {
        let pending = self.pending.take().ok_or(JobError::NoForeground)?;
        let outcome = pending.done.recv();

        {
            let mut state = lock(&self.state);
            if state.foreground == Some(pending.pgid) {
                state.foreground = None;
            }
        }
        let reclaimed = self.reclaim_terminal();

        let outcome = match outcome {
            Ok(JobOutcome::Stopped) => {
                eprintln!("\n[{}]+  Stopped   {}", pending.id, pending.command);
                JobOutcome::Stopped
            }
            Ok(done) => done,
            Err(_) => return Err(JobError::DispatcherGone),
        };
        // 結末は失わずに返し、ターミナルを戻せなかったことは表示だけする
        if let Err(e) = reclaimed {
            tracing::warn!(job = pending.id, pgid = pending.pgid, error = %e, "terminal not reclaimed");
            eprintln!("psh: {}", e);
        }
        Ok(outcome)
    }

    /// ターミナルをシェルのプロセスグループに戻す。冪等。
    pub fn reclaim_terminal(&self) -> Result<(), JobError> {
        self.terminal.reclaim().map_err(JobError::Reclaim)
    }
}

/// バックグラウンドジョブの結末を待ち、完了を通知するスレッドを起動する。
fn supervise(id: usize, pgid: pid_t, command: String, done: Receiver<JobOutcome>) {
    let spawned = thread::Builder::new()
        .name(format!("psh-job-{}", id))
        .spawn(move || match done.recv() {
            Ok(JobOutcome::Done(code)) => eprintln!("[{}]   Done({})   {}", id, code, command),
            Ok(JobOutcome::Stopped) => eprintln!("[{}]   Stopped   {}", id, command),
            Err(_) => tracing::debug!(job = id, pgid, "job dropped before completing"),
        });
    if let Err(e) = spawned {
        tracing::warn!(job = id, pgid, error = %e, "cannot start job supervisor");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// `hand_to` / `reclaim` の呼び出しを記録するターミナル。
    #[derive(Default)]
    struct RecordingTerminal {
        calls: Mutex<Vec<String>>,
        refuse_handoff: bool,
        refuse_reclaim: bool,
        /// `group_alive` が `false` を返す（全員回収済みのグループ）。
        group_gone: bool,
    }

    impl RecordingTerminal {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Terminal for RecordingTerminal {
        fn hand_to(&self, pgid: pid_t) -> io::Result<()> {
            self.calls.lock().unwrap().push(format!("hand_to {}", pgid));
            if self.refuse_handoff {
                return Err(io::Error::from_raw_os_error(libc::ENOTTY));
            }
            Ok(())
        }

        fn reclaim(&self) -> io::Result<()> {
            self.calls.lock().unwrap().push("reclaim".to_string());
            if self.refuse_reclaim {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            Ok(())
        }

        fn group_alive(&self, _pgid: pid_t) -> bool {
            !self.group_gone
        }
    }

    fn setup(terminal: RecordingTerminal) -> (JobControl, Sender<ChildEvent>, Arc<RecordingTerminal>) {
        let (tx, rx) = mpsc::channel();
        let terminal = Arc::new(terminal);
        let jobs = JobControl::new(rx, terminal.clone()).unwrap();
        (jobs, tx, terminal)
    }

    fn fake_spawn(pids: &'static [pid_t]) -> impl FnOnce(&mut ProcessGroup) -> Result<(), ShellError> {
        move |group| {
            for &pid in pids {
                group.push(pid);
            }
            Ok(())
        }
    }

    fn exited(pid: pid_t, code: i32) -> ChildEvent {
        ChildEvent { pid, status: ChildStatus::Exited(code) }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn status_from_raw() {
        // Linux/macOS 共通のエンコーディング: exit code は上位バイト、シグナルは下位 7 ビット
        assert_eq!(ChildStatus::from_raw(3 << 8), Some(ChildStatus::Exited(3)));
        assert_eq!(ChildStatus::from_raw(libc::SIGKILL), Some(ChildStatus::Signaled(libc::SIGKILL)));
        assert_eq!(
            ChildStatus::from_raw((libc::SIGTSTP << 8) | 0x7f),
            Some(ChildStatus::Stopped(libc::SIGTSTP)),
        );
        assert_eq!(ChildStatus::Signaled(libc::SIGINT).exit_code(), 130);
    }

    #[test]
    fn process_group_takes_first_pid() {
        let mut group = ProcessGroup::default();
        assert_eq!(group.spawn_pgid(), 0);
        group.push(4242);
        group.push(4243);
        assert_eq!(group.pgid(), Some(4242));
        assert_eq!(group.spawn_pgid(), 4242);
    }

    #[test]
    fn job_ids_reuse_smallest_free_slot() {
        let mut table = JobTable::default();
        let mut g = ProcessGroup::default();
        g.push(10);
        assert_eq!(table.insert(&g, "a", false, None), 1);
        assert_eq!(table.insert(&g, "b", false, None), 2);
        table.jobs.retain(|j| j.id != 1);
        assert_eq!(table.insert(&g, "c", false, None), 1);
        assert_eq!(table.get(2).map(|j| j.command.as_str()), Some("b"));
    }

    #[test]
    fn done_requires_every_member() {
        let mut table = JobTable::default();
        let mut g = ProcessGroup::default();
        g.push(20);
        g.push(21);
        let (tx, rx) = mpsc::channel();
        table.insert(&g, "a | b", true, Some(tx));

        table.apply(exited(21, 0));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 1);

        table.apply(ChildEvent { pid: 20, status: ChildStatus::Signaled(libc::SIGPIPE) });
        // 終了ステータスは最終ステージのもの
        assert_eq!(rx.try_recv(), Ok(JobOutcome::Done(0)));
        assert!(table.is_empty());
    }

    #[test]
    fn tty_read_before_handoff_is_not_a_stop() {
        let mut table = JobTable::default();
        let mut g = ProcessGroup::default();
        g.push(30);
        let (tx, rx) = mpsc::channel();
        table.insert(&g, "less notes.md", true, Some(tx));

        table.apply(ChildEvent { pid: 30, status: ChildStatus::Stopped(libc::SIGTTIN) });
        assert!(rx.try_recv().is_err());
        table.apply(ChildEvent { pid: 30, status: ChildStatus::Continued });
        table.apply(exited(30, 0));
        assert_eq!(rx.try_recv(), Ok(JobOutcome::Done(0)));
    }

    #[test]
    fn untracked_events_are_ignored() {
        let mut table = JobTable::default();
        table.apply(exited(999, 0));
        assert!(table.is_empty());
    }

    #[test]
    fn foreground_waits_for_all_members_then_reclaims() {
        let (mut jobs, tx, terminal) = setup(RecordingTerminal::default());

        let launched = jobs
            .launch(LaunchMode::Foreground, "a | b", fake_spawn(&[100, 101]))
            .unwrap();
        assert_eq!(launched, Launched::Foreground { pgid: 100 });
        assert_eq!(jobs.foreground(), Some(100));
        assert_eq!(terminal.calls(), vec!["hand_to 100"]);

        tx.send(exited(100, 0)).unwrap();
        let late = tx.clone();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            late.send(exited(101, 7)).unwrap();
        });

        assert_eq!(jobs.wait_foreground().unwrap(), JobOutcome::Done(7));
        sender.join().unwrap();

        assert_eq!(jobs.foreground(), None);
        assert_eq!(terminal.calls(), vec!["hand_to 100", "reclaim"]);
        assert_eq!(jobs.job_count(), 0);
    }

    #[test]
    fn reclaim_is_idempotent() {
        let (jobs, _tx, terminal) = setup(RecordingTerminal::default());
        jobs.reclaim_terminal().unwrap();
        jobs.reclaim_terminal().unwrap();
        assert_eq!(terminal.calls(), vec!["reclaim", "reclaim"]);
        assert_eq!(jobs.foreground(), None);
    }

    #[test]
    fn background_returns_immediately_and_keeps_foreground_intact() {
        let (mut jobs, tx, terminal) = setup(RecordingTerminal::default());

        let bg = jobs
            .launch(LaunchMode::Background, "sleep 1", fake_spawn(&[200]))
            .unwrap();
        assert_eq!(bg, Launched::Background { id: 1, pgid: 200 });
        assert_eq!(jobs.foreground(), None);

        jobs.launch(LaunchMode::Foreground, "vi", fake_spawn(&[300]))
            .unwrap();
        assert_eq!(jobs.foreground(), Some(300));

        // バックグラウンドジョブの完了はフォアグラウンド状態に影響しない
        tx.send(exited(200, 0)).unwrap();
        wait_until(|| jobs.job_count() == 1);
        assert_eq!(jobs.foreground(), Some(300));

        tx.send(exited(300, 0)).unwrap();
        assert_eq!(jobs.wait_foreground().unwrap(), JobOutcome::Done(0));
        assert_eq!(jobs.foreground(), None);
        assert_eq!(terminal.calls(), vec!["hand_to 300", "reclaim"]);
    }

    #[test]
    fn stopped_foreground_job_stays_tracked() {
        let (mut jobs, tx, _terminal) = setup(RecordingTerminal::default());
        jobs.launch(LaunchMode::Foreground, "vi", fake_spawn(&[400]))
            .unwrap();

        tx.send(ChildEvent { pid: 400, status: ChildStatus::Stopped(libc::SIGTSTP) })
            .unwrap();
        assert_eq!(jobs.wait_foreground().unwrap(), JobOutcome::Stopped);
        assert_eq!(jobs.foreground(), None);
        assert_eq!(jobs.job_count(), 1);

        tx.send(ChildEvent { pid: 400, status: ChildStatus::Signaled(libc::SIGKILL) })
            .unwrap();
        wait_until(|| jobs.job_count() == 0);
    }

    #[test]
    fn handoff_failure_is_reported_and_job_keeps_running() {
        let (mut jobs, tx, _terminal) = setup(RecordingTerminal {
            refuse_handoff: true,
            ..Default::default()
        });

        let err = jobs
            .launch(LaunchMode::Foreground, "top", fake_spawn(&[500]))
            .unwrap_err();
        assert!(matches!(err, ShellError::Job(JobError::Handoff { pgid: 500, .. })));
        assert_eq!(jobs.foreground(), None);
        assert_eq!(jobs.job_count(), 1);
        assert!(matches!(jobs.wait_foreground(), Err(JobError::NoForeground)));

        tx.send(exited(500, 0)).unwrap();
        wait_until(|| jobs.job_count() == 0);
    }

    #[test]
    fn job_reaped_before_handoff_is_still_foreground() {
        let (mut jobs, tx, terminal) = setup(RecordingTerminal {
            refuse_handoff: true,
            group_gone: true,
            ..Default::default()
        });

        // 登録と同時に終了通知が出ている（ディスパッチャはロック待ち）
        let reaped = tx.clone();
        let launched = jobs
            .launch(LaunchMode::Foreground, "true", move |group| {
                group.push(550);
                reaped.send(exited(550, 0)).unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(launched, Launched::Foreground { pgid: 550 });
        assert_eq!(jobs.wait_foreground().unwrap(), JobOutcome::Done(0));
        assert_eq!(jobs.job_count(), 0);
        assert_eq!(jobs.foreground(), None);
        assert_eq!(terminal.calls(), vec!["hand_to 550", "reclaim"]);
    }

    #[test]
    fn reclaim_failure_keeps_the_outcome() {
        let (mut jobs, tx, _terminal) = setup(RecordingTerminal {
            refuse_reclaim: true,
            ..Default::default()
        });
        jobs.launch(LaunchMode::Foreground, "vi", fake_spawn(&[560]))
            .unwrap();

        tx.send(ChildEvent { pid: 560, status: ChildStatus::Stopped(libc::SIGTSTP) })
            .unwrap();
        assert_eq!(jobs.wait_foreground().unwrap(), JobOutcome::Stopped);
        assert_eq!(jobs.job_count(), 1);
        assert!(matches!(jobs.reclaim_terminal(), Err(JobError::Reclaim(_))));
    }

    #[test]
    fn second_foreground_launch_is_rejected() {
        let (mut jobs, tx, _terminal) = setup(RecordingTerminal::default());
        jobs.launch(LaunchMode::Foreground, "a", fake_spawn(&[600]))
            .unwrap();
        let err = jobs
            .launch(LaunchMode::Foreground, "b", fake_spawn(&[601]))
            .unwrap_err();
        assert!(matches!(err, ShellError::Job(JobError::ForegroundBusy)));

        tx.send(exited(600, 0)).unwrap();
        jobs.wait_foreground().unwrap();
    }

    #[test]
    fn partial_launch_is_tracked_without_foreground() {
        let (mut jobs, tx, terminal) = setup(RecordingTerminal::default());
        let err = jobs
            .launch(LaunchMode::Foreground, "a | missing", |group| {
                group.push(700);
                Err(JobError::DispatcherGone.into())
            })
            .unwrap_err();
        assert!(matches!(err, ShellError::Job(JobError::DispatcherGone)));
        assert_eq!(jobs.foreground(), None);
        assert!(terminal.calls().is_empty());
        assert_eq!(jobs.job_count(), 1);

        tx.send(exited(700, 141)).unwrap();
        wait_until(|| jobs.job_count() == 0);
    }
}
