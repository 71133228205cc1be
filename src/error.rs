//! シェル全体のエラー型。各モジュールのエラーを束ね、終了ステータスへ換算する。

use thiserror::Error;

use crate::builtins::BuiltinError;
use crate::compiler::CompileError;
use crate::executor::LaunchError;
use crate::job::JobError;

/// 1 行の実行で発生しうるエラー。読み取りループは `psh: {}` で表示して次の行へ進む。
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Builtin(#[from] BuiltinError),
}

impl ShellError {
    /// `last_status` に設定する値。
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Compile(_) | Self::Builtin(_) => 2,
            Self::Launch(e) => e.exit_status(),
            Self::Job(_) => 1,
        }
    }
}
