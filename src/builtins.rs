//! ビルトインコマンドの実装。
//!
//! ビルトインはプロセスを起動せずシェル内で直接実行する。
//! 行の最初のトークンを [`BuiltinKind::from_name`] で判定し、
//! 該当すればパイプラインのコンパイルより前に [`run`] で処理する。
//!
//! | コマンド | 動作 |
//! |---------|------|
//! | `cd DIR` / `cd -` | カレントディレクトリを変更し `PWD` / `OLDPWD` を更新 |
//! | `set NAME VALUE` | 変数を設定（子プロセスに継承される） |
//! | `about` | シェルの説明を表示 |
//! | `exit [N]` / `quit [N]` | シェルを終了 |

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::env::Environment;
use crate::shell::Outcome;

/// ビルトインのエラー。
#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("cd: missing directory operand")]
    CdMissingOperand,
    #[error("cd: OLDPWD not set")]
    OldPwdUnset,
    #[error("cd: {dir}: {source}")]
    Cd {
        dir: String,
        #[source]
        source: io::Error,
    },
    #[error("set: usage: set NAME VALUE")]
    SetUsage,
    #[error("exit: {0}: numeric argument required")]
    ExitStatus(String),
    #[error("{0}: pipes and redirects cannot be used with a built-in command")]
    Operators(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Cd,
    Set,
    About,
    Exit,
}

impl BuiltinKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cd" => Some(Self::Cd),
            "set" => Some(Self::Set),
            "about" => Some(Self::About),
            "exit" | "quit" => Some(Self::Exit),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Cd => "cd",
            Self::Set => "set",
            Self::About => "about",
            Self::Exit => "exit",
        }
    }
}

const ABOUT: &str = "\
psh is a small interactive shell.
It runs pipelines of external programs (`a | b | c`), redirects the first
stage's input with `<` and the last stage's output with `>`, and runs a
line in the background when it starts or ends with `&`.
Words are expanded for $VARIABLES, ~ and glob patterns before running.
Built-ins: cd, set, about, exit (or quit).";

/// ビルトインを実行する。`args[0]` はコマンド名。
///
/// `last_status` は引数なしの `exit` が使う。
pub fn run(
    kind: BuiltinKind,
    args: &[String],
    env: &mut dyn Environment,
    last_status: i32,
) -> Result<Outcome, BuiltinError> {
    match kind {
        BuiltinKind::Cd => builtin_cd(args, env),
        BuiltinKind::Set => builtin_set(args, env),
        BuiltinKind::About => {
            println!("{}", ABOUT);
            Ok(Outcome::Finished(0))
        }
        BuiltinKind::Exit => builtin_exit(args, last_status),
    }
}

/// `cd DIR` / `cd -`。引数なしはエラーで、`PWD` / `OLDPWD` は変更しない。
fn builtin_cd(args: &[String], env: &mut dyn Environment) -> Result<Outcome, BuiltinError> {
    let operand = args.get(1).ok_or(BuiltinError::CdMissingOperand)?;
    let (target, announce) = if operand == "-" {
        (env.var("OLDPWD").ok_or(BuiltinError::OldPwdUnset)?, true)
    } else {
        (operand.clone(), false)
    };

    let previous = env
        .current_dir()
        .ok()
        .map(|p| p.display().to_string())
        .or_else(|| env.var("PWD"));

    env.set_current_dir(Path::new(&target))
        .map_err(|source| BuiltinError::Cd {
            dir: target.clone(),
            source,
        })?;
    let now = env
        .current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or(target);

    if let Some(previous) = previous {
        env.set_var("OLDPWD", &previous);
    }
    env.set_var("PWD", &now);
    if announce {
        println!("{}", now);
    }
    Ok(Outcome::Finished(0))
}

/// `set NAME VALUE...` — 残りの引数は空白 1 つでつなぐ。
fn builtin_set(args: &[String], env: &mut dyn Environment) -> Result<Outcome, BuiltinError> {
    let [_, name, value @ ..] = args else {
        return Err(BuiltinError::SetUsage);
    };
    if value.is_empty() || !is_name(name) {
        return Err(BuiltinError::SetUsage);
    }
    env.set_var(name, &value.join(" "));
    Ok(Outcome::Finished(0))
}

fn is_name(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// `exit [N]` — N 省略時は直前のステータスで終了する。
fn builtin_exit(args: &[String], last_status: i32) -> Result<Outcome, BuiltinError> {
    match args.get(1) {
        None => Ok(Outcome::Exit(last_status)),
        Some(n) => n
            .parse::<i32>()
            .map(Outcome::Exit)
            .map_err(|_| BuiltinError::ExitStatus(n.clone())),
    }
}
