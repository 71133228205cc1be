//! psh — パイプラインとジョブ制御を備えた小さな対話シェル
//!
//! 読み取りループ: プロンプト表示 → rustyline で 1 行読み取り → [`Shell::run_line`] → ループ
//!
//! 起動時の準備:
//! 1. ジョブ制御系シグナルを無視し、SIGCHLD をブロック（以降に作るスレッドすべてに継承される）
//! 2. 対話時はターミナルを掌握する（[`Tty::claim`]）
//! 3. SIGCHLD リスナースレッドと [`JobControl`] のディスパッチャを起動
//! 4. `SHELL` / `PWD` を設定し、`~/.pshrc` を読み込む

use std::process;
use std::sync::mpsc;
use std::sync::Arc;

use argh::FromArgs;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use psh::env::{Environment, ProcessEnv};
use psh::job::{Detached, JobControl, Terminal, Tty};
use psh::shell::Shell;
use psh::signal;

#[derive(FromArgs)]
/// a small interactive shell with pipelines and job control
struct Args {
    /// run COMMAND non-interactively and exit with its status
    #[argh(option, short = 'c')]
    command: Option<String>,

    /// do not source ~/.pshrc
    #[argh(switch)]
    norc: bool,

    /// do not print the start-up banner
    #[argh(switch)]
    no_banner: bool,
}

/// `PSH_LOG` でフィルタ（既定 `warn`）。stderr にカラーなしで出力する。
fn init_logging() {
    let filter = EnvFilter::try_from_env("PSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .init();
}

/// `SHELL` を実行ファイルのパスに、`PWD` をカレントディレクトリにする。
fn init_env(env: &mut dyn Environment) {
    match std::env::current_exe() {
        Ok(exe) => env.set_var("SHELL", &exe.display().to_string()),
        Err(e) => tracing::debug!(error = %e, "cannot resolve executable path"),
    }
    if let Ok(cwd) = env.current_dir() {
        env.set_var("PWD", &cwd.display().to_string());
    }
}

/// `~/.pshrc` を読み込んで各行を実行する。ファイルが存在しなければサイレントスキップ。
///
/// 途中で `exit` が実行されたらその終了コードを返す。
fn load_rc(shell: &mut Shell) -> Option<i32> {
    let home = shell.env().var("HOME")?;
    let rc_path = format!("{}/.pshrc", home);
    let content = match std::fs::read_to_string(&rc_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(path = %rc_path, error = %e, "no start-up file");
            return None;
        }
    };
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match shell.run_line(trimmed) {
            Ok(Some(code)) => return Some(code),
            Ok(None) => {}
            Err(e) => eprintln!("psh: ~/.pshrc: {}", e),
        }
    }
    None
}

fn print_banner() {
    println!("psh {}", env!("CARGO_PKG_VERSION"));
    println!("Type `about` for a short description and `exit` to leave.");
}

/// 対話ループ。終了コードを返す。
fn run_interactive(shell: &mut Shell) -> i32 {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("psh: cannot start line editor: {}", e);
            return 1;
        }
    };

    loop {
        let prompt = shell.prompt();
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line.as_str()) {
                    tracing::debug!(error = %e, "cannot record history");
                }
                match shell.run_line(&line) {
                    Ok(Some(code)) => return code,
                    Ok(None) => {}
                    Err(e) => eprintln!("psh: {}", e),
                }
            }
            // Ctrl+C: 入力中の行を破棄
            Err(ReadlineError::Interrupted) => continue,
            // Ctrl+D
            Err(ReadlineError::Eof) => {
                println!();
                return shell.last_status;
            }
            Err(e) => {
                eprintln!("psh: {}", e);
                return 1;
            }
        }
    }
}

fn main() {
    let args: Args = argh::from_env();
    init_logging();

    // シェル自体は SIGINT/SIGTSTP/SIGTTOU/SIGTTIN を無視する。
    // 子プロセスは posix_spawnattr の POSIX_SPAWN_SETSIGDEF で SIG_DFL にリセットされる。
    signal::ignore_job_control_signals();
    if let Err(e) = signal::block_sigchld() {
        eprintln!("psh: cannot block SIGCHLD: {}", e);
        process::exit(1);
    }

    let terminal: Arc<dyn Terminal> = if args.command.is_some() {
        Arc::new(Detached)
    } else {
        match Tty::claim(libc::STDIN_FILENO) {
            Ok(tty) => {
                tracing::debug!(pgid = tty.shell_pgid(), "terminal claimed");
                Arc::new(tty)
            }
            Err(e) => {
                tracing::debug!(error = %e, "running without job control");
                Arc::new(Detached)
            }
        }
    };

    let (events, receiver) = mpsc::channel();
    let started = signal::spawn_listener(events)
        .and_then(|_listener| JobControl::new(receiver, terminal));
    let jobs = match started {
        Ok(jobs) => jobs,
        Err(e) => {
            eprintln!("psh: cannot start job control: {}", e);
            process::exit(1);
        }
    };

    let mut shell = Shell::new(jobs, Box::new(ProcessEnv));
    init_env(shell.env_mut());

    if !args.norc {
        if let Some(code) = load_rc(&mut shell) {
            process::exit(code);
        }
    }

    if let Some(command) = args.command {
        let code = match shell.run_line(&command) {
            Ok(Some(code)) => code,
            Ok(None) => shell.last_status,
            Err(e) => {
                eprintln!("psh: {}", e);
                shell.last_status
            }
        };
        process::exit(code);
    }

    if !args.no_banner {
        print_banner();
    }
    let code = run_interactive(&mut shell);
    process::exit(code);
}
