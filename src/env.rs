//! 環境変数ストアとカレントディレクトリへのアクセス。
//!
//! シェル本体は [`ProcessEnv`] を使い、`std::env` を直接書き換える。
//! `posix_spawnp` には `environ` をそのまま渡すため、設定した変数は子プロセスへ自動的に継承される。
//! テストでは [`Environment`] を実装した独立インスタンスを差し込める。

use std::io;
use std::path::{Path, PathBuf};

/// シェルが読み書きする変数ストア。
pub trait Environment {
    /// 変数の値を返す。未定義なら `None`。
    fn var(&self, key: &str) -> Option<String>;
    fn set_var(&mut self, key: &str, value: &str);
    fn current_dir(&self) -> io::Result<PathBuf>;
    fn set_current_dir(&mut self, dir: &Path) -> io::Result<()>;
}

/// プロセス全体の環境変数・カレントディレクトリを操作する実装。
#[derive(Debug, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set_var(&mut self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }

    fn set_current_dir(&mut self, dir: &Path) -> io::Result<()> {
        std::env::set_current_dir(dir)
    }
}
