//! POSIX-style argument splitting and quoting for user-supplied launch options.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),
    #[error("trailing backslash")]
    TrailingEscape,
}

/// Split a command-line fragment into words the way `sh` would, minus expansion.
///
/// Single quotes are literal, double quotes honour `\"`, `\\`, `\$` and `` \` ``,
/// and a bare backslash escapes the next character.
pub fn split_args_quoted(src: &str) -> Result<Vec<String>, SplitError> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = src.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let next = chars.next().ok_or(SplitError::TrailingEscape)?;
                // backslash-newline is a line continuation
                if next != '\n' { cur.push(next); }
                in_word = true;
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => cur.push(c),
                        None => return Err(SplitError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => cur.push(c),
                            Some('\n') => {}
                            Some(c) => { cur.push('\\'); cur.push(c); }
                            None => return Err(SplitError::UnterminatedQuote('"')),
                        },
                        Some(c) => cur.push(c),
                        None => return Err(SplitError::UnterminatedQuote('"')),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    out.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            c => { cur.push(c); in_word = true; }
        }
    }
    if in_word { out.push(cur); }
    Ok(out)
}

fn is_safe_unquoted(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c)
}

/// Quote a single word so `sh` reads it back verbatim.
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    if word.chars().all(is_safe_unquoted) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\"'\"'"))
}

/// Render an argv as a copy-pasteable shell line, for logs.
pub fn join<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter().map(|a| quote(a.as_ref())).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_words() {
        assert_eq!(split_args_quoted("  -windowed   -dx11 ").unwrap(), vec!["-windowed", "-dx11"]);
        assert!(split_args_quoted("   ").unwrap().is_empty());
    }

    #[test]
    fn honours_quotes_and_escapes() {
        assert_eq!(
            split_args_quoted(r#"gamemoderun "--name=My Game" 'it''s' a\ b"#).unwrap(),
            vec!["gamemoderun", "--name=My Game", "its", "a b"]
        );
        assert_eq!(split_args_quoted(r#""a\"b" 'c\d'"#).unwrap(), vec!["a\"b", "c\\d"]);
        assert_eq!(split_args_quoted("''").unwrap(), vec![""]);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(split_args_quoted("-foo \"bar"), Err(SplitError::UnterminatedQuote('"')));
        assert_eq!(split_args_quoted("'bar"), Err(SplitError::UnterminatedQuote('\'')));
        assert_eq!(split_args_quoted("bar\\"), Err(SplitError::TrailingEscape));
    }

    #[test]
    fn quote_round_trips_through_split() {
        for word in ["plain", "/g/My Game/Game.exe", "it's", "", "$HOME"] {
            let line = quote(word);
            assert_eq!(split_args_quoted(&line).unwrap(), vec![word.to_string()]);
        }
        assert_eq!(join(&["cd", "/a b"]), "cd '/a b'");
    }
}
