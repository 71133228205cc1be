//! パイプラインコンパイラ: トークン列から [`Pipeline`] を構築する。
//!
//! ## 規則
//!
//! - ワードは展開して現在のステージの引数に追加する（先頭のプログラム名には glob を適用しない）
//! - `<` / `>` は次のトークンをリダイレクト先として消費する（引数には入らない）
//! - `|` で現在のステージを閉じ、新しいステージを始める
//! - `&` は行頭か行末にのみ置け、パイプラインをバックグラウンド実行にする
//!
//! ## 空ステージ
//!
//! `a | | b` の中央のように引数もリダイレクトもないステージは取り除き、
//! 前後のステージを 1 本のパイプで直接つなぐ。リダイレクトだけを持つ空ステージや、
//! 全ステージが空の行は [`CompileError::EmptyCommand`] になる。

use std::io;

use thiserror::Error;

use crate::expand::{Expand, ExpandError};
use crate::token::{Token, TokenKind};

/// コンパイル時（起動前）のエラー。これが返った場合プロセスは 1 つも起動されない。
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: empty command")]
    EmptyCommand,
    #[error("syntax error: missing target after `{0}`")]
    MissingRedirectTarget(char),
    #[error("syntax error: `&` is only allowed at the start or end of a line")]
    MisplacedBackground,
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Expand(#[from] ExpandError),
}

/// パイプラインの 1 ステージ。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageDescriptor {
    /// `args[0]` がプログラム名。
    pub args: Vec<String>,
    /// `<` の対象。先頭ステージでのみ有効。
    pub stdin: Option<String>,
    /// `>` の対象。最終ステージでのみ有効。
    pub stdout: Option<String>,
}

impl StageDescriptor {
    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    fn has_redirect(&self) -> bool {
        self.stdin.is_some() || self.stdout.is_some()
    }

    fn is_blank(&self) -> bool {
        self.args.is_empty() && !self.has_redirect()
    }
}

/// コンパイル済みパイプライン。空でないことはコンストラクタで保証される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<StageDescriptor>,
    background: bool,
}

impl Pipeline {
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// 末尾（または先頭）に `&` が指定された場合に `true`。
    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 先頭ステージの入力リダイレクト。
    pub fn stdin_path(&self) -> Option<&str> {
        self.stages.first().and_then(|s| s.stdin.as_deref())
    }

    /// 最終ステージの出力リダイレクト。
    pub fn stdout_path(&self) -> Option<&str> {
        self.stages.last().and_then(|s| s.stdout.as_deref())
    }
}

/// トークン列をパイプラインにコンパイルする。
///
/// トークンが空なら `Ok(None)`（コマンドなし、エラーではない）。
pub fn compile(tokens: &[Token], expander: &dyn Expand) -> Result<Option<Pipeline>, CompileError> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let (tokens, background) = strip_background(tokens)?;

    let mut stages = Vec::new();
    let mut current = StageDescriptor::default();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        match token.kind() {
            // プログラム名は glob 展開しない（`[ -f x ]` の `[` など）
            TokenKind::Word if current.args.is_empty() => {
                current.args.push(expander.expand_path(token.as_str())?);
            }
            TokenKind::Word => current.args.extend(expander.expand_word(token.as_str())?),
            TokenKind::StdinRedirect => {
                current.stdin = Some(redirect_target('<', iter.next(), expander)?);
            }
            TokenKind::StdoutRedirect => {
                current.stdout = Some(redirect_target('>', iter.next(), expander)?);
            }
            TokenKind::Pipe => stages.push(std::mem::take(&mut current)),
            TokenKind::Background => return Err(CompileError::MisplacedBackground),
        }
    }
    // 末尾の `|` は直前のステージを閉じるだけで、空ステージを追加しない
    if !current.is_blank() {
        stages.push(current);
    }

    let stages = splice_empty_stages(stages)?;
    Ok(Some(Pipeline { stages, background }))
}

/// 行頭・行末の `&` を取り除き、バックグラウンド指定かどうかを返す。
fn strip_background(tokens: &[Token]) -> Result<(&[Token], bool), CompileError> {
    let mut body = tokens;
    let mut background = false;
    if body.last().map(Token::kind) == Some(TokenKind::Background) {
        body = &body[..body.len() - 1];
        background = true;
    }
    if body.first().map(Token::kind) == Some(TokenKind::Background) {
        body = &body[1..];
        background = true;
    }
    if body.is_empty() {
        return Err(CompileError::EmptyCommand);
    }
    Ok((body, background))
}

/// リダイレクト演算子の次のトークンをパスとして取り出す。
fn redirect_target(
    op: char,
    next: Option<&Token>,
    expander: &dyn Expand,
) -> Result<String, CompileError> {
    match next {
        Some(token) if token.is_word() => Ok(expander.expand_path(token.as_str())?),
        _ => Err(CompileError::MissingRedirectTarget(op)),
    }
}

/// 引数のないステージを取り除く。
fn splice_empty_stages(stages: Vec<StageDescriptor>) -> Result<Vec<StageDescriptor>, CompileError> {
    let mut kept = Vec::with_capacity(stages.len());
    for stage in stages {
        if !stage.args.is_empty() {
            kept.push(stage);
        } else if stage.has_redirect() {
            return Err(CompileError::EmptyCommand);
        } else {
            tracing::debug!(position = kept.len(), "splicing out empty pipeline stage");
        }
    }
    if kept.is_empty() {
        return Err(CompileError::EmptyCommand);
    }
    Ok(kept)
}
