//! パイプライン実行: コンパイル済み [`Pipeline`] の各ステージを起動し、パイプで接続する。
//!
//! 1. リダイレクト先のファイルを先に開く（失敗したら何も起動しない）
//! 2. ステージごとに close-on-exec なパイプを作り、`posix_spawnp` で起動
//! 3. 先頭ステージのグループに後続ステージを生成時点で参加させる
//! 4. 子に渡した fd は起動直後に親側で閉じる（EOF が伝わるように）
//!
//! 待機とターミナル制御は [`job`](crate::job) が担当する。

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use thiserror::Error;

use crate::compiler::{CompileError, Pipeline};
use crate::error::ShellError;
use crate::job::ProcessGroup;
use crate::spawn;

/// 起動時のエラー。
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{command}: {}", spawn_reason(*.errno))]
    Spawn { command: String, errno: i32 },
    #[error("pipe: {0}")]
    Pipe(#[source] io::Error),
}

impl LaunchError {
    /// ENOENT → 127, EACCES → 126, その他 → 1
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Spawn { errno, .. } if *errno == libc::ENOENT => 127,
            Self::Spawn { errno, .. } if *errno == libc::EACCES => 126,
            _ => 1,
        }
    }
}

fn spawn_reason(errno: i32) -> String {
    match errno {
        libc::ENOENT => "command not found".to_string(),
        libc::EACCES => "permission denied".to_string(),
        _ => format!("spawn failed: {}", io::Error::from_raw_os_error(errno)),
    }
}

/// パイプラインの全ステージを起動し、pid を `group` に追加する。
///
/// 途中のステージで失敗した場合、起動済みのプロセスは `group` に残したままエラーを返す。
pub fn spawn_pipeline(pipeline: &Pipeline, group: &mut ProcessGroup) -> Result<(), ShellError> {
    let input = match pipeline.stdin_path() {
        Some(path) => Some(File::open(path).map_err(|source| redirect_error(path, source))?),
        None => None,
    };
    let mut output = match pipeline.stdout_path() {
        Some(path) => Some(
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .map_err(|source| redirect_error(path, source))?,
        ),
        None => None,
    };

    let stages = pipeline.stages();
    let last = stages.len() - 1;
    for (i, stage) in stages.iter().enumerate() {
        if i > 0 && stage.stdin.is_some() {
            tracing::warn!(stage = i, "input redirect on a non-first stage is ignored");
        }
        if i < last && stage.stdout.is_some() {
            tracing::warn!(stage = i, "output redirect on a non-last stage is ignored");
        }
    }

    let mut upstream: Option<OwnedFd> = input.map(OwnedFd::from);
    for (i, stage) in stages.iter().enumerate() {
        let (next, stdout) = if i < last {
            let (read, write) = cloexec_pipe().map_err(LaunchError::Pipe)?;
            (Some(read), Some(write))
        } else {
            (None, output.take().map(OwnedFd::from))
        };
        let stdin = upstream.take();

        let pid = spawn::spawn(&stage.args, group.spawn_pgid(), raw(&stdin), raw(&stdout))
            .map_err(|errno| LaunchError::Spawn {
                command: stage.program().to_string(),
                errno,
            })?;
        group.push(pid);
        tracing::debug!(pid, pgid = group.spawn_pgid(), stage = i, program = stage.program(), "spawned");

        // 子に渡した分は親側で閉じる
        drop(stdin);
        drop(stdout);
        upstream = next;
    }
    Ok(())
}

fn redirect_error(path: &str, source: io::Error) -> ShellError {
    CompileError::Redirect {
        path: path.to_string(),
        source,
    }
    .into()
}

fn raw(fd: &Option<OwnedFd>) -> Option<RawFd> {
    fd.as_ref().map(AsRawFd::as_raw_fd)
}

/// 両端とも close-on-exec のパイプを作る。(読み出し側, 書き込み側)
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    for fd in [&read, &write] {
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok((read, write))
}
