//! トークナイザ: 入力行を分類済みトークン列に分割する。
//!
//! 空白でワードを区切り、`|` `<` `>` `&` は前後に空白がなくても必ず 1 文字の
//! 独立したトークンになる。クォートやエスケープは扱わない。
//!
//! トークンの分類は文字列の内容だけから導出されるため、`|` などのリテラルを
//! 引数としてプログラムに渡すことはできない。

use std::fmt;

/// トークンの分類。[`Token::kind`] が内容から都度計算する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// 通常のワード（プログラム名・引数・リダイレクト先）
    Word,
    /// `|`
    Pipe,
    /// `<`
    StdinRedirect,
    /// `>`
    StdoutRedirect,
    /// `&` — バックグラウンド実行マーカー
    Background,
}

/// 不変のトークン文字列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 内容からトークンの分類を導出する。
    pub fn kind(&self) -> TokenKind {
        match self.0.as_str() {
            "|" => TokenKind::Pipe,
            "<" => TokenKind::StdinRedirect,
            ">" => TokenKind::StdoutRedirect,
            "&" => TokenKind::Background,
            _ => TokenKind::Word,
        }
    }

    pub fn is_word(&self) -> bool {
        self.kind() == TokenKind::Word
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 演算子文字か判定する。
fn is_operator(c: char) -> bool {
    matches!(c, '|' | '<' | '>' | '&')
}

/// 入力行をトークン列に分割する。空行・空白のみの行は空のベクタを返す。
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in line.char_indices() {
        if c.is_whitespace() || is_operator(c) {
            if let Some(start) = word_start.take() {
                tokens.push(Token::new(&line[start..i]));
            }
            if is_operator(c) {
                tokens.push(Token::new(&line[i..i + c.len_utf8()]));
            }
        } else if word_start.is_none() {
            word_start = Some(i);
        }
    }
    if let Some(start) = word_start {
        tokens.push(Token::new(&line[start..]));
    }

    tokens
}
