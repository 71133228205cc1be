//! `posix_spawnp()` の安全な Rust ラッパー。
//!
//! 子プロセスは生成時点でプロセスグループに所属させる（`POSIX_SPAWN_SETPGROUP`）。
//! 生成後に `setpgid` で付け替えないため、子が即座に終了してもグループ割り当てと競合しない。
//!
//! | 型 | 役割 |
//! |-----|------|
//! | [`SpawnAttr`] | `posix_spawnattr_t` の RAII ラッパー（プロセスグループ、シグナル設定） |
//! | [`FileActions`] | `posix_spawn_file_actions_t` の RAII ラッパー（fd 操作） |
//! | [`CStringVec`] | argv 用の NULL 終端ポインタ配列 |
//! | [`spawn`] | 上記を組み合わせて `posix_spawnp` を呼ぶ公開関数 |

use std::ffi::{CString, NulError};
use std::os::fd::RawFd;

use libc::pid_t;

// ── SpawnAttr ─────────────────────────────────────────────────────

/// `posix_spawnattr_t` の RAII ラッパー。Drop で自動 destroy。
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Self {
        unsafe {
            let mut attr: libc::posix_spawnattr_t = std::mem::zeroed();
            libc::posix_spawnattr_init(&mut attr);
            Self { inner: attr }
        }
    }

    fn add_flags(&mut self, extra: libc::c_int) {
        unsafe {
            let mut flags: libc::c_short = 0;
            libc::posix_spawnattr_getflags(&self.inner, &mut flags);
            flags |= extra as libc::c_short;
            libc::posix_spawnattr_setflags(&mut self.inner, flags);
        }
    }

    /// `pgid == 0` なら子の PID が新しいグループのリーダーになる。
    fn set_pgroup(&mut self, pgid: pid_t) {
        self.add_flags(libc::POSIX_SPAWN_SETPGROUP);
        unsafe {
            libc::posix_spawnattr_setpgroup(&mut self.inner, pgid);
        }
    }

    /// シェルが無視しているジョブ制御系シグナルを子で `SIG_DFL` に戻す。
    fn set_sigdefault(&mut self) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGDEF);
        unsafe {
            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            for sig in [libc::SIGINT, libc::SIGTSTP, libc::SIGTTOU, libc::SIGTTIN] {
                libc::sigaddset(&mut sigset, sig);
            }
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &sigset);
        }
    }

    /// シェルは SIGCHLD をブロックしているので、子のシグナルマスクは空にする。
    fn clear_sigmask(&mut self) {
        self.add_flags(libc::POSIX_SPAWN_SETSIGMASK);
        unsafe {
            let mut sigset: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut sigset);
            libc::posix_spawnattr_setsigmask(&mut self.inner, &sigset);
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

// ── FileActions ───────────────────────────────────────────────────

/// `posix_spawn_file_actions_t` の RAII ラッパー。Drop で自動 destroy。
struct FileActions {
    inner: libc::posix_spawn_file_actions_t,
}

impl FileActions {
    fn new() -> Self {
        unsafe {
            let mut actions: libc::posix_spawn_file_actions_t = std::mem::zeroed();
            libc::posix_spawn_file_actions_init(&mut actions);
            Self { inner: actions }
        }
    }

    /// `fd` を `target` に複製し、元の fd は子側で閉じる。
    ///
    /// `fd == target` でも dup2 は登録する（close-on-exec フラグが外れる）。
    fn redirect(&mut self, fd: RawFd, target: RawFd) {
        unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.inner, fd, target);
            if fd != target {
                libc::posix_spawn_file_actions_addclose(&mut self.inner, fd);
            }
        }
    }

    fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
        &self.inner
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        unsafe {
            libc::posix_spawn_file_actions_destroy(&mut self.inner);
        }
    }
}

// ── CStringVec ────────────────────────────────────────────────────

/// argv 用の CString ベクタ。NULL 終端のポインタ配列を構築する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*mut libc::c_char>,
}

impl CStringVec {
    fn from_args(args: &[String]) -> Result<Self, NulError> {
        let strings = args
            .iter()
            .map(|s| CString::new(s.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ptrs: Vec<*mut libc::c_char> = strings
            .iter()
            .map(|s| s.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(std::ptr::null_mut()); // NULL 終端
        Ok(Self {
            _strings: strings,
            ptrs,
        })
    }

    fn program(&self) -> *const libc::c_char {
        self.ptrs[0]
    }

    fn as_ptr(&self) -> *const *mut libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── spawn 関数 ────────────────────────────────────────────────────

/// `posix_spawnp` で子プロセスを起動する。成功時は子 PID、失敗時は errno を返す。
///
/// - `args`: コマンドと引数（`args[0]` がコマンド名、PATH 検索付き）。空であってはならない
/// - `pgid`: 所属させるプロセスグループ（0 なら子 PID をリーダーにする）
/// - `stdin_fd` / `stdout_fd`: 接続する fd（`None` なら継承）。stderr は常に継承
pub fn spawn(
    args: &[String],
    pgid: pid_t,
    stdin_fd: Option<RawFd>,
    stdout_fd: Option<RawFd>,
) -> Result<pid_t, i32> {
    if args.is_empty() {
        return Err(libc::EINVAL);
    }
    let argv = CStringVec::from_args(args).map_err(|_| libc::EINVAL)?;

    let mut attr = SpawnAttr::new();
    attr.set_pgroup(pgid);
    attr.set_sigdefault();
    attr.clear_sigmask();

    let mut actions = FileActions::new();
    if let Some(fd) = stdin_fd {
        actions.redirect(fd, libc::STDIN_FILENO);
    }
    if let Some(fd) = stdout_fd {
        actions.redirect(fd, libc::STDOUT_FILENO);
    }

    // environ を継承（std::env::set_var で設定済みの環境がそのまま渡る）
    extern "C" {
        static environ: *const *mut libc::c_char;
    }

    let mut pid: pid_t = 0;
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv.program(),
            actions.as_ptr(),
            attr.as_ptr(),
            argv.as_ptr(),
            environ as *const *mut libc::c_char,
        )
    };

    if ret != 0 {
        return Err(ret);
    }
    Ok(pid)
}
