//! シグナル設定と子プロセス監視。
//!
//! SIGCHLD はすべてのスレッドでブロックし、専用のリスナースレッドが `sigwait` で受け取る。
//! 受け取るたびに `waitpid(-1, WNOHANG | WUNTRACED | WCONTINUED)` で状態変化を吸い出し、
//! [`ChildEvent`] としてチャネルに流す。シグナルハンドラは使わない。

use std::io;
use std::mem::MaybeUninit;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use crate::job::{ChildEvent, ChildStatus};

/// シェル自身がジョブ制御系シグナルで止まったり終了したりしないようにする。
/// 子プロセスでは spawn 時に `SIG_DFL` へ戻される。
pub fn ignore_job_control_signals() {
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTSTP, libc::SIGTTOU, libc::SIGTTIN] {
            libc::signal(sig, libc::SIG_IGN);
        }
    }
}

fn sigchld_set() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGCHLD);
        set.assume_init()
    }
}

/// 呼び出しスレッドの SIGCHLD をブロックする。
///
/// 以降に起動するスレッドはマスクを継承するので、他のスレッドを作る前に呼ぶこと。
pub fn block_sigchld() -> io::Result<()> {
    let set = sigchld_set();
    let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    Ok(())
}

/// SIGCHLD を待ち受けて子プロセスの状態変化を `events` に送るスレッドを起動する。
///
/// 受信側が drop されるとスレッドは終了する。
pub fn spawn_listener(events: Sender<ChildEvent>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("psh-sigchld".into())
        .spawn(move || {
            let set = sigchld_set();
            loop {
                let mut sig: libc::c_int = 0;
                let ret = unsafe { libc::sigwait(&set, &mut sig) };
                if ret != 0 {
                    tracing::warn!(error = %io::Error::from_raw_os_error(ret), "sigwait failed");
                    return;
                }
                if !drain(-1, &events) {
                    tracing::debug!("child event receiver dropped");
                    return;
                }
            }
        })
}

/// `target`（`waitpid` の第 1 引数）に該当する子のうち、状態変化のあったものをすべて送る。
/// 受信側がいなければ `false`。
///
/// 複数の SIGCHLD は 1 つにまとめられうるので、`waitpid` が 0 か ECHILD を返すまで繰り返す。
fn drain(target: libc::pid_t, events: &Sender<ChildEvent>) -> bool {
    loop {
        let mut raw: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(target, &mut raw, libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED)
        };
        if pid <= 0 {
            return true;
        }
        let Some(status) = ChildStatus::from_raw(raw) else {
            continue;
        };
        tracing::debug!(pid, ?status, "reaped child");
        if events.send(ChildEvent { pid, status }).is_err() {
            return false;
        }
    }
}
