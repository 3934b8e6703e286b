//! Strict `KEY=VALUE` grammar for the settings file.
//!
//! The settings file looks like a shell env file but is never sourced.
//! Every line is either blank, a `#` comment, or `KEY=VALUE` where `KEY`
//! matches `[A-Za-z_][A-Za-z0-9_]*`. Anything else is rejected with its
//! line number. Values are taken literally: no expansion, no escapes, only
//! one layer of matching quotes is stripped.

use std::fmt::Write;
use std::path::Path;

use crate::error::SettingsError;

/// Header written at the top of every saved settings file.
const HEADER: &str = "# Managed by netbox-manager. Edit with care: values are read literally.\n";

/// Parses settings file content into ordered key/value pairs.
///
/// Later duplicates override earlier ones when the pairs are folded into
/// settings, matching how the file would read top to bottom.
///
/// # Errors
///
/// Returns [`SettingsError::MalformedLine`] for the first line that is not
/// blank, a comment, or a valid assignment.
pub fn parse(content: &str, path: &Path) -> Result<Vec<(String, String)>, SettingsError> {
    let mut pairs = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || SettingsError::MalformedLine {
            path: path.to_path_buf(),
            line: index + 1,
            content: raw.to_string(),
        };

        let (key, value) = line.split_once('=').ok_or_else(malformed)?;
        let key = key.trim();
        if !is_valid_key(key) || value.contains('\0') {
            return Err(malformed());
        }

        pairs.push((key.to_string(), unquote(value.trim()).to_string()));
    }

    Ok(pairs)
}

/// Renders pairs into settings file content.
#[must_use]
pub fn render(pairs: &[(String, String)]) -> String {
    let mut out = String::from(HEADER);
    for (key, value) in pairs {
        let _ = writeln!(out, "{key}={}", quote(value));
    }
    out
}

/// Checks a key against `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strips one layer of matching single or double quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Quotes a value when reading it back literally would otherwise change it.
fn quote(value: &str) -> String {
    let needs_quotes = value != value.trim()
        || value.starts_with('#')
        || unquote(value) != value;

    if !needs_quotes {
        return value.to_string();
    }
    if value.contains('"') {
        format!("'{value}'")
    } else {
        format!("\"{value}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> Result<Vec<(String, String)>, SettingsError> {
        parse(content, Path::new("test.env"))
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let pairs = parse_str("# header\n\n   \nNETBOX_PORT=8081\n  # indented comment\n").unwrap();
        assert_eq!(pairs, vec![(String::from("NETBOX_PORT"), String::from("8081"))]);
    }

    #[test]
    fn test_values_are_literal() {
        let pairs = parse_str("A=$(rm -rf /)\nB=`id`\nC=x;y\nD=a=b").unwrap();
        assert_eq!(pairs[0].1, "$(rm -rf /)");
        assert_eq!(pairs[1].1, "`id`");
        assert_eq!(pairs[2].1, "x;y");
        assert_eq!(pairs[3].1, "a=b");
    }

    #[test]
    fn test_quotes_stripped_once() {
        let pairs = parse_str("A=\"hello world\"\nB='\"x\"'\nC=\"unbalanced").unwrap();
        assert_eq!(pairs[0].1, "hello world");
        assert_eq!(pairs[1].1, "\"x\"");
        assert_eq!(pairs[2].1, "\"unbalanced");
    }

    #[test]
    fn test_malformed_lines_rejected_with_line_number() {
        let cases = [
            "export A=1",
            "A B=1",
            "1A=1",
            "=value",
            "no assignment here",
            "A-B=1",
            "$(reboot)=1",
        ];

        for case in cases {
            let content = format!("OK=1\n{case}\n");
            match parse_str(&content) {
                Err(SettingsError::MalformedLine { line, content, .. }) => {
                    assert_eq!(line, 2, "{case}");
                    assert_eq!(content, case);
                }
                other => panic!("{case:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_key_grammar() {
        assert!(is_valid_key("_"));
        assert!(is_valid_key("NETBOX_PORT"));
        assert!(is_valid_key("a1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("9A"));
        assert!(!is_valid_key("A.B"));
    }

    #[test]
    fn test_render_reads_back_identically() {
        let pairs = vec![
            (String::from("PLAIN"), String::from("value")),
            (String::from("SPACED"), String::from(" padded ")),
            (String::from("HASH"), String::from("#notacomment")),
            (String::from("QUOTED"), String::from("\"kept\"")),
            (String::from("EMPTY"), String::new()),
        ];

        let rendered = render(&pairs);
        assert!(rendered.starts_with('#'));
        assert_eq!(parse_str(&rendered).unwrap(), pairs);
    }
}
