//! パス名展開（glob）: `*`, `?`, `[...]` によるファイル名マッチング。
//!
//! - `*` — 0 文字以上の任意の文字
//! - `?` — 任意の 1 文字
//! - `[abc]` / `[a-z]` — 文字クラス・範囲
//! - `[!...]` / `[^...]` — 否定文字クラス
//!
//! `.` で始まるファイルはパターンが `.` で始まる場合のみマッチする。
//! 閉じ括弧のない `[` は不正パターンとして [`PatternError`] を返す。

use thiserror::Error;

/// 不正な glob パターン。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("{0}: unclosed `[` in pattern")]
    UnclosedBracket(String),
}

/// パターンにグロブ文字が含まれるか判定する。
pub fn has_glob_chars(s: &str) -> bool {
    s.bytes().any(|b| b == b'*' || b == b'?' || b == b'[')
}

/// パターンの構文を検査する。
pub fn validate(pattern: &str) -> Result<(), PatternError> {
    let pat = pattern.as_bytes();
    let mut i = 0;
    while i < pat.len() {
        if pat[i] == b'[' {
            match class_end(pat, i) {
                Some(end) => i = end + 1,
                None => return Err(PatternError::UnclosedBracket(pattern.to_string())),
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// `pat[open]` の `[` に対応する `]` の位置を返す。`]` は否定記号の直後・先頭ならリテラル扱い。
fn class_end(pat: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    if i < pat.len() && (pat[i] == b'!' || pat[i] == b'^') {
        i += 1;
    }
    if i < pat.len() && pat[i] == b']' {
        i += 1;
    }
    pat[i.min(pat.len())..]
        .iter()
        .position(|&b| b == b']')
        .map(|offset| i + offset)
}

/// パターンを展開し、マッチしたパスをソート済みで返す。
/// マッチなしなら元のパターン 1 要素を返す。
pub fn expand(pattern: &str) -> Result<Vec<String>, PatternError> {
    validate(pattern)?;
    let results = expand_unchecked(pattern);
    if results.is_empty() {
        Ok(vec![pattern.to_string()])
    } else {
        Ok(results)
    }
}

fn expand_unchecked(pattern: &str) -> Vec<String> {
    match pattern.rfind('/') {
        Some(slash) => {
            let dir_part = &pattern[..slash];
            let file_part = &pattern[slash + 1..];
            if has_glob_chars(dir_part) {
                // ディレクトリ部分にもグロブ → 候補ディレクトリごとに展開
                expand_unchecked(dir_part)
                    .iter()
                    .filter(|dir| std::path::Path::new(dir).is_dir())
                    .flat_map(|dir| expand_in_dir(dir, file_part))
                    .collect()
            } else {
                let dir = if dir_part.is_empty() { "/" } else { dir_part };
                expand_in_dir(dir, file_part)
            }
        }
        None => expand_in_dir(".", pattern),
    }
}

/// 指定ディレクトリ内でファイル名パターンにマッチするエントリを返す。
fn expand_in_dir(dir: &str, file_pattern: &str) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut matches: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.') || file_pattern.starts_with('.'))
        .filter(|name| matches_pattern(file_pattern, name))
        .map(|name| match dir {
            "." => name,
            "/" => format!("/{}", name),
            _ => format!("{}/{}", dir, name),
        })
        .collect();
    matches.sort();
    matches
}

/// パターン文字列とファイル名を照合する。
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    match_from(pattern.as_bytes(), name.as_bytes())
}

fn match_from(pat: &[u8], nam: &[u8]) -> bool {
    let (mut pi, mut ni) = (0, 0);

    while pi < pat.len() {
        match pat[pi] {
            b'*' => {
                while pi < pat.len() && pat[pi] == b'*' {
                    pi += 1;
                }
                if pi == pat.len() {
                    return true;
                }
                return (ni..=nam.len()).any(|start| match_from(&pat[pi..], &nam[start..]));
            }
            b'?' => {
                if ni >= nam.len() {
                    return false;
                }
                pi += 1;
                ni += 1;
            }
            b'[' => {
                let end = match class_end(pat, pi) {
                    Some(end) => end,
                    None => return false,
                };
                if ni >= nam.len() || !class_matches(&pat[pi + 1..end], nam[ni]) {
                    return false;
                }
                pi = end + 1;
                ni += 1;
            }
            ch => {
                if ni >= nam.len() || nam[ni] != ch {
                    return false;
                }
                pi += 1;
                ni += 1;
            }
        }
    }

    ni == nam.len()
}

/// `[` と `]` の間の文字クラスが `ch` にマッチするか。
fn class_matches(class: &[u8], ch: u8) -> bool {
    let (negate, body) = match class.first() {
        Some(b'!') | Some(b'^') => (true, &class[1..]),
        _ => (false, class),
    };

    let mut matched = false;
    let mut i = 0;
    while i < body.len() {
        if i + 2 < body.len() && body[i + 1] == b'-' {
            let (lo, hi) = (body[i].min(body[i + 2]), body[i].max(body[i + 2]));
            matched |= lo <= ch && ch <= hi;
            i += 3;
        } else {
            matched |= body[i] == ch;
            i += 1;
        }
    }
    matched != negate
}
