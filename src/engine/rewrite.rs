//! Script rewriting
//!
//! Turns submitted text into an executable body in three steps: symbol remap,
//! cooperative-idiom rewrite and wrapping with the preamble. Both rewrites work
//! on tokens, so a rule can never match inside a longer identifier or a
//! string literal.

use std::fmt;

use serde::Deserialize;

use super::script::lexer::{tokenize, Token, TokenKind};
use super::script::STOP_EVENT_NAME;

/// Indent every body line gets, so the whole body forms one block
pub const BODY_INDENT: usize = 2;

/// Preamble used until a host registers its own
pub const DEFAULT_PREAMBLE: &[&str] = &["import uasyncio as asyncio"];

/// Modules whose blocking sleeps are turned into cooperative ones
const BLOCKING_MODULES: &[&str] = &["time", "utime"];

/// Replace a symbol with another before the script is compiled
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemapRule {
    pub from: String,
    pub to: String,
}

impl RemapRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Where a body line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Preamble(usize),
    Script(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Preamble(n) => write!(f, "preamble line {n}"),
            Location::Script(n) => write!(f, "script line {n}"),
        }
    }
}

/// Rewritten script wrapped with the preamble, ready for compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableBody {
    pub text: String,
    preamble_len: usize,
}

impl ExecutableBody {
    /// Map a 1-based body line back to the submitted script
    pub fn locate(&self, line: usize) -> Location {
        if line <= self.preamble_len {
            Location::Preamble(line)
        } else {
            Location::Script(line - self.preamble_len)
        }
    }

    /// The rewritten script lines, without the preamble
    pub fn script_text(&self) -> String {
        self.text
            .lines()
            .skip(self.preamble_len)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Full rewrite: remap, cooperative idioms, then wrap with the preamble
pub fn rewrite(text: &str, rules: &[RemapRule], preamble: &[String]) -> ExecutableBody {
    wrap(&cooperative(&remap(text, rules)), preamble)
}

/// Apply remap rules in order; each rule sees the output of the previous one
///
/// A rule whose `from` side is not a valid token sequence is skipped. Lines
/// that do not tokenize are left untouched for the compiler to report.
pub fn remap(text: &str, rules: &[RemapRule]) -> String {
    let mut text = text.to_string();
    for rule in rules {
        let pattern = match tokenize(&rule.from) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            _ => continue,
        };
        text = map_lines(&text, |line, tokens| {
            let mut edits = Vec::new();
            let mut i = 0;
            while i + pattern.len() <= tokens.len() {
                let window = &tokens[i..i + pattern.len()];
                if window.iter().zip(&pattern).all(|(a, b)| a.kind == b.kind) {
                    edits.push((window[0].start, window[window.len() - 1].end, rule.to.clone()));
                    i += pattern.len();
                } else {
                    i += 1;
                }
            }
            apply(line, edits)
        });
    }
    text
}

/// Rewrite blocking sleeps and endless loops into their cooperative forms
///
/// - `time.sleep(x)` becomes `await asyncio.sleep(x)` (also `utime`, `sleep_ms`)
/// - `while True:` / `while 1:` becomes `while not stop_event.is_set():`
pub fn cooperative(text: &str) -> String {
    map_lines(text, |line, tokens| {
        let mut edits = Vec::new();

        if let [kw, cond, colon, ..] = tokens {
            let endless = matches!(cond.kind, TokenKind::Int(1)) || cond.is_name("True");
            if kw.is_name("while") && endless && colon.is_punct(":") {
                edits.push((
                    cond.start,
                    cond.end,
                    format!("not {STOP_EVENT_NAME}.is_set()"),
                ));
            }
        }

        for i in 0..tokens.len() {
            let Some(call) = blocking_sleep(&tokens[i..]) else {
                continue;
            };
            let awaited = i > 0 && tokens[i - 1].is_name("await");
            let prefix = if awaited { "" } else { "await " };
            edits.push((
                tokens[i].start,
                tokens[i + 2].end,
                format!("{prefix}asyncio.{call}"),
            ));
        }

        apply(line, edits)
    })
}

/// `time.sleep(` at the head of `tokens`, with balanced parentheses after it
fn blocking_sleep(tokens: &[Token]) -> Option<&'static str> {
    let [module, dot, func, open, rest @ ..] = tokens else {
        return None;
    };
    if !BLOCKING_MODULES.iter().any(|m| module.is_name(m)) || !dot.is_punct(".") {
        return None;
    }
    if !open.is_punct("(") {
        return None;
    }
    let call = if func.is_name("sleep") {
        "sleep"
    } else if func.is_name("sleep_ms") {
        "sleep_ms"
    } else {
        return None;
    };

    let mut depth = 1;
    for token in rest {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some(call);
            }
        }
    }
    None
}

/// Indent preamble and script lines into one block
pub fn wrap(text: &str, preamble: &[String]) -> ExecutableBody {
    let indent = " ".repeat(BODY_INDENT);
    let mut lines = Vec::with_capacity(preamble.len() + text.lines().count());
    for line in preamble.iter().map(String::as_str).chain(text.lines()) {
        if line.trim().is_empty() {
            lines.push(String::new());
        } else {
            lines.push(format!("{indent}{line}"));
        }
    }

    ExecutableBody {
        text: lines.join("\n"),
        preamble_len: preamble.len(),
    }
}

fn map_lines<F>(text: &str, mut f: F) -> String
where
    F: FnMut(&str, &[Token]) -> String,
{
    text.lines()
        .map(|line| match tokenize(line) {
            Ok(tokens) if !tokens.is_empty() => f(line, &tokens),
            _ => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply non-overlapping span replacements, given in any order
fn apply(line: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    if edits.is_empty() {
        return line.to_string();
    }
    edits.sort_by_key(|(start, _, _)| *start);

    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    for (start, end, replacement) in edits {
        if start < cursor {
            continue;
        }
        out.push_str(&line[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&line[cursor..]);
    out
}
