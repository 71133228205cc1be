//! psh ライブラリ — ベンチマーク・テスト用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の読み取りループ。
//! この `lib.rs` は `benches/bench_main.rs` 等の外部クレートから
//! トークナイザ・コンパイラ・ジョブ制御に直接アクセスするために存在する。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`token`] | トークナイザ（空白区切り、`|` `<` `>` `&` の分離と分類） |
//! | [`compiler`] | パイプラインコンパイラ（ステージ分割、リダイレクト、`&`、空ステージの除去） |
//! | [`expand`] | ワード展開（`$VAR`/`${VAR}`、`~`/`~user`、glob） |
//! | [`glob`] | パス名展開（`*`, `?`, `[...]` によるファイル名マッチング） |
//! | [`executor`] | パイプライン起動（リダイレクトファイル、close-on-exec パイプ、プロセスグループ） |
//! | [`spawn`] | `posix_spawnp` ラッパー（グループ所属、シグナル初期化、fd 付け替え） |
//! | [`job`] | ジョブコントロール（ジョブテーブル、ターミナル受け渡し、フォアグラウンド待機、バックグラウンド監視） |
//! | [`signal`] | シグナル設定と SIGCHLD リスナースレッド |
//! | [`builtins`] | ビルトイン（`cd`, `set`, `about`, `exit`/`quit`） |
//! | [`env`] | 環境変数ストアとカレントディレクトリ |
//! | [`shell`] | シェルの状態と 1 行の実行 |
//! | [`error`] | エラー型の集約と終了ステータスへの換算 |

pub mod builtins;
pub mod compiler;
pub mod env;
pub mod error;
pub mod executor;
pub mod expand;
pub mod glob;
pub mod job;
pub mod shell;
pub mod signal;
pub mod spawn;
pub mod token;
