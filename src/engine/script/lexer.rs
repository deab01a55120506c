//! Line tokenizer for the script grammar
//!
//! Scripts are line oriented: a statement never spans two lines, so the lexer
//! works on one line at a time and keeps byte spans so the rewriter can edit
//! the original text in place.

use thiserror::Error;

/// Punctuation, longest first so `//=` wins over `//` and `/`
const PUNCTS: &[&str] = &[
    "//=", "==", "!=", "<=", ">=", "+=", "-=", "*=", "//", "(", ")", ",", ":", ".", "=", "+",
    "-", "*", "/", "%", "<", ">",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character
    pub start: usize,
    /// Byte offset one past the last character
    pub end: usize,
}

impl Token {
    pub fn is_name(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Name(n) if n == name)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(self.kind, TokenKind::Punct(p) if p == punct)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("unterminated string starting at column {0}")]
    UnterminatedString(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected character '{ch}' at column {column}")]
    UnexpectedChar { ch: char, column: usize },
}

/// Tokenize a single line; a `#` outside a string ends the line
pub fn tokenize(line: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '#' {
            break;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Name(line[start..end].to_string()),
                start,
                end,
            });
            continue;
        }

        if ch.is_ascii_digit() {
            let mut end = start;
            let mut seen_dot = false;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '_' || (c == '.' && !seen_dot) {
                    seen_dot |= c == '.';
                    end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let text = line[start..end].replace('_', "");
            let kind = if seen_dot {
                text.parse::<f64>()
                    .map(TokenKind::Float)
                    .map_err(|_| LexError::InvalidNumber(text.clone()))?
            } else {
                text.parse::<i64>()
                    .map(TokenKind::Int)
                    .map_err(|_| LexError::InvalidNumber(text.clone()))?
            };
            tokens.push(Token { kind, start, end });
            continue;
        }

        if ch == '"' || ch == '\'' {
            chars.next();
            let mut value = String::new();
            let mut end = None;
            while let Some((i, c)) = chars.next() {
                if c == ch {
                    end = Some(i + 1);
                    break;
                }
                if c == '\\' {
                    match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, 't')) => value.push('\t'),
                        Some((_, 'r')) => value.push('\r'),
                        Some((_, '0')) => value.push('\0'),
                        Some((_, other)) => value.push(other),
                        None => break,
                    }
                } else {
                    value.push(c);
                }
            }
            let end = end.ok_or(LexError::UnterminatedString(start + 1))?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                start,
                end,
            });
            continue;
        }

        let rest = &line[start..];
        match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                for _ in 0..p.len() {
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    start,
                    end: start + p.len(),
                });
            }
            None => {
                return Err(LexError::UnexpectedChar {
                    ch,
                    column: start + 1,
                })
            }
        }
    }

    Ok(tokens)
}

/// Leading indentation width of a line, tabs counted as four columns
pub fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}
