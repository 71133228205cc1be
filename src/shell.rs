//! シェルの実行状態と 1 行の実行。
//!
//! [`Shell::execute_line`] は 1 行を トークン化 → ビルトイン判定 → コンパイル → 起動 まで進め、
//! フォアグラウンドの場合は [`Outcome::ForegroundWait`] を返す。呼び出し側はその後
//! [`Shell::wait_foreground`] で完了を待つ。両者をまとめたのが [`Shell::run_line`]。

use crate::builtins::{self, BuiltinError, BuiltinKind};
use crate::compiler::{self, CompileError, Pipeline};
use crate::env::Environment;
use crate::error::ShellError;
use crate::executor;
use crate::expand::{self, Expand, Expander, Verbatim};
use crate::job::{JobControl, JobOutcome, LaunchMode, Launched};
use crate::token::{self, Token};

/// 1 行を実行した結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 実行完了。終了ステータス。
    Finished(i32),
    /// `exit` / `quit` が要求された。
    Exit(i32),
    /// フォアグラウンドジョブを起動した。[`Shell::wait_foreground`] を呼ぶこと。
    ForegroundWait,
}

/// シェルの実行状態。読み取りループ全体で共有される。
pub struct Shell {
    /// 直前のコマンドの終了ステータス。プロンプト表示と `exit` のデフォルト値に使う。
    pub last_status: i32,
    jobs: JobControl,
    env: Box<dyn Environment>,
}

impl Shell {
    pub fn new(jobs: JobControl, env: Box<dyn Environment>) -> Self {
        Self {
            last_status: 0,
            jobs,
            env,
        }
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn env_mut(&mut self) -> &mut dyn Environment {
        self.env.as_mut()
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    /// 1 行を実行する。空行は何もせず直前のステータスを返す。
    pub fn execute_line(&mut self, line: &str) -> Result<Outcome, ShellError> {
        let tokens = token::tokenize(line);
        let Some(first) = tokens.first() else {
            return Ok(Outcome::Finished(self.last_status));
        };

        if let Some(kind) = BuiltinKind::from_name(first.as_str()) {
            return self.run_builtin(kind, &tokens);
        }

        let compiled = compiler::compile(&tokens, &Expander::new(self.env.as_ref()))?;
        let Some(pipeline) = compiled else {
            return Ok(Outcome::Finished(self.last_status));
        };
        self.launch(&pipeline, line)
    }

    fn launch(&mut self, pipeline: &Pipeline, line: &str) -> Result<Outcome, ShellError> {
        let mode = if pipeline.is_background() {
            LaunchMode::Background
        } else {
            LaunchMode::Foreground
        };
        let command = display_text(line);
        let launched = self
            .jobs
            .launch(mode, command, |group| executor::spawn_pipeline(pipeline, group))?;

        match launched {
            Launched::Foreground { .. } => Ok(Outcome::ForegroundWait),
            Launched::Background { id, pgid } => {
                eprintln!("[{}] {}", id, pgid);
                Ok(Outcome::Finished(0))
            }
        }
    }

    /// フォアグラウンドジョブを待ち、終了ステータスを返す。停止した場合は 128 + SIGTSTP。
    pub fn wait_foreground(&mut self) -> Result<i32, ShellError> {
        match self.jobs.wait_foreground()? {
            JobOutcome::Done(status) => Ok(status),
            JobOutcome::Stopped => Ok(128 + libc::SIGTSTP),
        }
    }

    /// 実行と待機をまとめて行い、`last_status` を更新する。
    ///
    /// `exit` が要求されたら `Ok(Some(code))`。エラーは表示せずに返す。
    pub fn run_line(&mut self, line: &str) -> Result<Option<i32>, ShellError> {
        let status = match self.execute_line(line) {
            Ok(Outcome::Exit(code)) => return Ok(Some(code)),
            Ok(Outcome::Finished(status)) => Ok(status),
            Ok(Outcome::ForegroundWait) => self.wait_foreground(),
            Err(e) => Err(e),
        };
        match status {
            Ok(status) => {
                self.last_status = status;
                Ok(None)
            }
            Err(e) => {
                self.last_status = e.exit_status();
                Err(e)
            }
        }
    }

    /// プロンプト文字列。`$PROMPT` があれば変数展開して使い、なければ `"{PWD}> "`。
    /// `PROMPT=!cmd` ならコマンドを実行し、その出力をプロンプトとする。
    /// 直前のステータスが 0 以外なら `[N] ` を前置する。
    pub fn prompt(&mut self) -> String {
        let body = match self.env.var("PROMPT") {
            Some(template) if template.len() > 1 && template.starts_with('!') => {
                self.prompt_from_command(&template[1..])
            }
            Some(template) => expand::expand_variables(&template, self.env.as_ref()).into_owned(),
            None => {
                let pwd = self
                    .env
                    .var("PWD")
                    .or_else(|| self.env.current_dir().ok().map(|p| p.display().to_string()))
                    .unwrap_or_default();
                format!("{}> ", pwd)
            }
        };
        if self.last_status != 0 {
            format!("[{}] {}", self.last_status, body)
        } else {
            body
        }
    }

    /// `PROMPT=!cmd` のコマンドをフォアグラウンドで実行する。出力はそのまま端末に出るので、
    /// 返すのは起動に失敗したときの代替プロンプトだけ。終了ステータスは `last_status` に反映しない。
    fn prompt_from_command(&mut self, command: &str) -> String {
        let line = expand::expand_variables(command, self.env.as_ref()).into_owned();
        let launched = match compiler::compile(&token::tokenize(&line), &Verbatim) {
            Ok(Some(pipeline)) => self.launch(&pipeline, &line),
            Ok(None) => Ok(Outcome::Finished(0)),
            Err(e) => Err(e.into()),
        };
        let finished = match launched {
            Ok(Outcome::ForegroundWait) => self.wait_foreground().map(Outcome::Finished),
            other => other,
        };
        match finished {
            Ok(_) => String::new(),
            Err(e) => {
                eprintln!("psh: invalid prompt command: {}", e);
                "> ".to_string()
            }
        }
    }

    fn run_builtin(&mut self, kind: BuiltinKind, tokens: &[Token]) -> Result<Outcome, ShellError> {
        if tokens.iter().any(|t| !t.is_word()) {
            return Err(BuiltinError::Operators(kind.name()).into());
        }
        let expander = Expander::new(self.env.as_ref());
        let mut args = Vec::with_capacity(tokens.len());
        for token in tokens {
            args.extend(expander.expand_word(token.as_str()).map_err(CompileError::from)?);
        }
        Ok(builtins::run(kind, &args, self.env.as_mut(), self.last_status)?)
    }
}

/// ジョブ表示用のコマンド文字列。前後の `&` と空白を落とす。
fn display_text(line: &str) -> &str {
    line.trim()
        .trim_start_matches('&')
        .trim_end_matches('&')
        .trim()
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::mpsc::{self, Sender};
    use std::sync::Arc;
    use std::thread;

    use libc::pid_t;

    use super::*;
    use crate::env::testing::MemoryEnv;
    use crate::job::{ChildEvent, ChildStatus, Detached, JobError};

    fn shell() -> (Shell, Sender<ChildEvent>) {
        let (tx, rx) = mpsc::channel();
        let jobs = JobControl::new(rx, Arc::new(Detached)).unwrap();
        let env = MemoryEnv::new(Path::new("/"));
        (Shell::new(jobs, Box::new(env)), tx)
    }

    /// プロセスグループの全メンバーを回収してイベントとして送る。
    fn reap_group(pgid: pid_t, events: Sender<ChildEvent>) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            let mut raw = 0;
            let pid = unsafe { libc::waitpid(-pgid, &mut raw, 0) };
            if pid <= 0 {
                return;
            }
            if let Some(status) = ChildStatus::from_raw(raw) {
                let _ = events.send(ChildEvent { pid, status });
            }
        })
    }

    fn run_foreground(shell: &mut Shell, tx: &Sender<ChildEvent>, line: &str) -> i32 {
        assert_eq!(shell.execute_line(line).unwrap(), Outcome::ForegroundWait);
        let pgid = shell.jobs.foreground().unwrap();
        let reaper = reap_group(pgid, tx.clone());
        let status = shell.wait_foreground().unwrap();
        reaper.join().unwrap();
        status
    }

    #[test]
    fn blank_line_keeps_status() {
        let (mut shell, _tx) = shell();
        shell.last_status = 4;
        assert_eq!(shell.execute_line("   ").unwrap(), Outcome::Finished(4));
    }

    #[test]
    fn foreground_pipeline_runs_to_completion() {
        let (mut shell, tx) = shell();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        shell.env_mut().set_var("OUT", out.to_str().unwrap());

        let status = run_foreground(&mut shell, &tx, "echo piped | tr a-z A-Z > $OUT");
        assert_eq!(status, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "PIPED\n");
        assert_eq!(shell.jobs.job_count(), 0);
        assert_eq!(shell.jobs.foreground(), None);
    }

    #[test]
    fn status_is_last_stage() {
        let (mut shell, tx) = shell();
        assert_eq!(run_foreground(&mut shell, &tx, "true | false"), 1);
        assert_eq!(run_foreground(&mut shell, &tx, "false | true"), 0);
    }

    #[test]
    fn compile_errors_set_status_two() {
        let (mut shell, _tx) = shell();
        let err = shell.run_line("cat <").unwrap_err();
        assert!(matches!(err, ShellError::Compile(CompileError::MissingRedirectTarget('<'))));
        assert_eq!(shell.last_status, 2);
        assert!(shell.jobs.foreground().is_none());
    }

    #[test]
    fn unknown_command_sets_127() {
        let (mut shell, _tx) = shell();
        assert!(shell.run_line("psh_no_such_command_xyz").is_err());
        assert_eq!(shell.last_status, 127);
        assert_eq!(shell.jobs.job_count(), 0);
    }

    #[test]
    fn builtins_run_in_process() {
        let (mut shell, _tx) = shell();
        assert_eq!(shell.run_line("set COLOR blue").unwrap(), None);
        assert_eq!(shell.env().var("COLOR").as_deref(), Some("blue"));
        shell.run_line("set SHADE $COLOR").unwrap();
        assert_eq!(shell.env().var("SHADE").as_deref(), Some("blue"));
        assert_eq!(shell.run_line("quit 3").unwrap(), Some(3));
    }

    #[test]
    fn builtin_with_operators_is_rejected() {
        let (mut shell, _tx) = shell();
        let err = shell.run_line("cd / | cat").unwrap_err();
        assert!(matches!(err, ShellError::Builtin(BuiltinError::Operators("cd"))));
        assert_eq!(shell.last_status, 2);
    }

    #[test]
    fn background_returns_without_waiting() {
        let (mut shell, tx) = shell();
        assert_eq!(shell.execute_line("sleep 0 &").unwrap(), Outcome::Finished(0));
        assert_eq!(shell.jobs.foreground(), None);
        assert!(matches!(
            shell.wait_foreground(),
            Err(ShellError::Job(JobError::NoForeground)),
        ));

        let pgid = shell.jobs.job_pgid(1).unwrap();
        reap_group(pgid, tx).join().unwrap();
        for _ in 0..200 {
            if shell.jobs.job_count() == 0 {
                return;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("background job was not removed");
    }

    #[test]
    fn prompt_formats() {
        let (mut shell, _tx) = shell();
        shell.env_mut().set_var("PWD", "/work");
        assert_eq!(shell.prompt(), "/work> ");
        shell.last_status = 1;
        assert_eq!(shell.prompt(), "[1] /work> ");
        shell.env_mut().set_var("USER", "kim");
        shell.env_mut().set_var("PROMPT", "$USER% ");
        shell.last_status = 0;
        assert_eq!(shell.prompt(), "kim% ");
    }

    #[test]
    fn prompt_command_that_cannot_start_falls_back() {
        let (mut shell, _tx) = shell();
        shell.env_mut().set_var("PROMPT", "!psh_no_such_command_xyz --short");
        assert_eq!(shell.prompt(), "> ");
        assert_eq!(shell.last_status, 0);
        assert_eq!(shell.jobs.job_count(), 0);

        // `!` だけなら通常のテンプレート扱い
        shell.env_mut().set_var("PROMPT", "!");
        assert_eq!(shell.prompt(), "!");
    }

    #[test]
    fn display_text_strips_ampersands() {
        assert_eq!(display_text("  sleep 5 & "), "sleep 5");
        assert_eq!(display_text("& make"), "make");
        assert_eq!(display_text("make&"), "make");
    }
}
