//! ワード単位の展開: 変数展開 → チルダ展開 → glob 展開。
//!
//! コンパイラはワードトークンごとに [`Expand`] を呼び出す。
//! シェル本体は [`Expander`]、テストやベンチマークは展開しない [`Verbatim`] を使う。

use std::borrow::Cow;

use thiserror::Error;

use crate::env::Environment;
use crate::glob::{self, PatternError};

/// 展開時のエラー。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error(transparent)]
    BadPattern(#[from] PatternError),
}

/// コンパイラから見た展開器。
pub trait Expand {
    /// 引数ワードを展開する。glob が複数にマッチすると複数の引数になる。
    fn expand_word(&self, word: &str) -> Result<Vec<String>, ExpandError>;

    /// リダイレクト先を展開する。glob は適用しない。
    fn expand_path(&self, word: &str) -> Result<String, ExpandError>;
}

/// 何も展開しない。トークンをそのまま引数にする。
#[derive(Debug, Default, Clone, Copy)]
pub struct Verbatim;

impl Expand for Verbatim {
    fn expand_word(&self, word: &str) -> Result<Vec<String>, ExpandError> {
        Ok(vec![word.to_string()])
    }

    fn expand_path(&self, word: &str) -> Result<String, ExpandError> {
        Ok(word.to_string())
    }
}

/// 環境変数ストアを参照する通常の展開器。
pub struct Expander<'a> {
    env: &'a dyn Environment,
}

impl<'a> Expander<'a> {
    pub fn new(env: &'a dyn Environment) -> Self {
        Self { env }
    }
}

impl Expand for Expander<'_> {
    fn expand_word(&self, word: &str) -> Result<Vec<String>, ExpandError> {
        let path = self.expand_path(word)?;
        if glob::has_glob_chars(&path) {
            Ok(glob::expand(&path)?)
        } else {
            Ok(vec![path])
        }
    }

    fn expand_path(&self, word: &str) -> Result<String, ExpandError> {
        let vars = expand_variables(word, self.env);
        Ok(expand_tilde(&vars, self.env).into_owned())
    }
}

// ── 変数展開 ────────────────────────────────────────────────────────

/// `$NAME` / `${NAME}` を展開する。未定義は空文字、`$` の後が識別子でなければリテラル。
pub fn expand_variables<'s>(s: &'s str, env: &dyn Environment) -> Cow<'s, str> {
    if !s.contains('$') {
        return Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut result = String::with_capacity(s.len());
    let mut pos = 0;
    let mut start = 0; // 未コピー部分の先頭

    while pos < bytes.len() {
        if bytes[pos] != b'$' {
            pos += 1;
            continue;
        }
        result.push_str(&s[start..pos]);
        pos += 1; // skip '$'

        match bytes.get(pos) {
            Some(b'{') => {
                let name_start = pos + 1;
                let name_end = s[name_start..]
                    .find('}')
                    .map(|offset| name_start + offset)
                    .filter(|&end| end > name_start && s[name_start..end].bytes().all(is_var_char));
                match name_end {
                    Some(end) => {
                        result.push_str(&env.var(&s[name_start..end]).unwrap_or_default());
                        pos = end + 1;
                    }
                    None => result.push('$'),
                }
            }
            Some(&b) if is_var_start(b) => {
                let name_start = pos;
                while pos < bytes.len() && is_var_char(bytes[pos]) {
                    pos += 1;
                }
                result.push_str(&env.var(&s[name_start..pos]).unwrap_or_default());
            }
            _ => result.push('$'),
        }
        start = pos;
    }
    result.push_str(&s[start..]);

    Cow::Owned(result)
}

/// 変数名の先頭文字として有効か（ASCII英字 or `_`）
fn is_var_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

/// 変数名の継続文字として有効か（ASCII英数字 or `_`）
fn is_var_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ── チルダ展開 ──────────────────────────────────────────────────────

/// `~` → `$HOME`, `~/path` → `$HOME/path`, `~user` → user のホーム。
/// 解決できなければそのまま返す。
pub fn expand_tilde<'s>(s: &'s str, env: &dyn Environment) -> Cow<'s, str> {
    if !s.starts_with('~') {
        return Cow::Borrowed(s);
    }
    let rest_start = s[1..].find('/').map(|i| i + 1).unwrap_or(s.len());
    let user = &s[1..rest_start];
    let rest = &s[rest_start..];

    let home = if user.is_empty() {
        env.var("HOME")
    } else {
        home_of(user)
    };
    match home {
        Some(home) => Cow::Owned(format!("{}{}", home, rest)),
        None => Cow::Borrowed(s),
    }
}

/// パスワードデータベースからユーザーのホームディレクトリを引く。
fn home_of(user: &str) -> Option<String> {
    let c_user = std::ffi::CString::new(user).ok()?;
    let pw = unsafe { libc::getpwnam(c_user.as_ptr()) };
    if pw.is_null() {
        return None;
    }
    let home = unsafe { std::ffi::CStr::from_ptr((*pw).pw_dir) };
    home.to_str().ok().map(str::to_string)
}
