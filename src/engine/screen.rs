//! Safety screen
//!
//! A best-effort denylist over submitted text. It is not a sandbox: it only
//! keeps obviously unwanted calls from reaching the compiler.

use super::error::SubmitError;
use super::hooks::LogHooks;

/// Reject `text` if it contains a denylist entry
///
/// Matching is a case-sensitive plain substring test over the whole text, so
/// an entry may span lines. The hit on the earliest line wins, entries in
/// registration order break ties; the line where it starts is logged through
/// the warn hook.
pub fn screen(text: &str, denylist: &[String], log: &LogHooks) -> Result<(), SubmitError> {
    let hit = denylist
        .iter()
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let pos = text.find(entry.as_str())?;
            Some((line_start(text, pos), entry))
        })
        .min_by_key(|(start, _)| *start);

    let Some((start, entry)) = hit else {
        return Ok(());
    };
    let line = text[start..].lines().next().unwrap_or_default().trim();
    log.warn(&format!("[EXEC]Unsafe command - {}", line));
    Err(SubmitError::RejectedUnsafe {
        entry: entry.clone(),
        line: line.to_string(),
    })
}

fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map_or(0, |i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hooks::testing::CapturedLogs;
    use crate::engine::hooks::LogLevel;

    fn denylist(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_clean_text_accepted() {
        let logs = CapturedLogs::default();
        let result = screen("x = 1\nprint(x)", &denylist(&["open"]), &logs.hooks());
        assert!(result.is_ok());
        assert!(logs.all().is_empty());
    }

    #[test]
    fn test_first_match_rejects_with_one_warning() {
        let logs = CapturedLogs::default();
        let text = "x = 1\nopen('/secret')\nimport os";

        let result = screen(text, &denylist(&["import os", "open"]), &logs.hooks());

        assert_eq!(
            result,
            Err(SubmitError::RejectedUnsafe {
                entry: "open".into(),
                line: "open('/secret')".into(),
            })
        );
        let warnings = logs.at(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("open('/secret')"));
    }

    #[test]
    fn test_match_is_case_sensitive_and_literal() {
        let logs = CapturedLogs::default();
        let hooks = logs.hooks();
        assert!(screen("OPEN()", &denylist(&["open"]), &hooks).is_ok());
        assert!(screen("a.b()", &denylist(&["a*b"]), &hooks).is_ok());
        assert!(screen("x = a*b", &denylist(&["a*b"]), &hooks).is_err());
        assert!(screen("anything", &denylist(&[""]), &hooks).is_ok());
    }

    #[test]
    fn test_entry_spanning_lines() {
        let logs = CapturedLogs::default();
        let text = "x = 1\nwhile True:\n    pass";

        let result = screen(text, &denylist(&["True:\n    pass"]), &logs.hooks());

        assert_eq!(
            result,
            Err(SubmitError::RejectedUnsafe {
                entry: "True:\n    pass".into(),
                line: "while True:".into(),
            })
        );
        assert_eq!(
            logs.at(LogLevel::Warn),
            vec!["[EXEC]Unsafe command - while True:".to_string()]
        );
    }

    #[test]
    fn test_earliest_line_wins_over_entry_order() {
        let logs = CapturedLogs::default();
        let text = "eval('1')\nopen('x')";

        let result = screen(text, &denylist(&["open", "eval"]), &logs.hooks());

        assert!(matches!(
            result,
            Err(SubmitError::RejectedUnsafe { entry, .. }) if entry == "eval"
        ));
    }
}
