//! `$(…)` span discovery and resolution budgets.
//!
//! The validator drives the actual bottom-up resolution (it owns the model
//! client and the executor); this module finds the spans and holds the
//! budget arithmetic. Span extraction prefers the shell grammar and falls
//! back to a paren-balancing scanner with escape-aware depth tracking when
//! the parser cannot cope.

use std::time::Duration;

use crate::bash::node_text;
use crate::bash::try_parse_bash;
use crate::bash::walk_all;
use crate::lexer;

/// Maximum resolved nesting height; the outermost substitution of a deeper
/// tree becomes `Unresolvable`.
pub const MAX_DEPTH: u32 = 3;

/// Total substitutions processed across one command's tree.
pub const MAX_COUNT: u32 = 10;

/// Cumulative captured stdout across the tree.
pub const MAX_BYTES: usize = 32 * 1024;

/// Wall-clock bound per inner command.
pub const INNER_TIMEOUT: Duration = Duration::from_secs(5);

/// Additive budget state threaded through one command's resolution.
#[derive(Debug, Default)]
pub struct BudgetState {
    pub count: u32,
    pub bytes: usize,
}

impl BudgetState {
    pub fn remaining_bytes(&self) -> usize {
        MAX_BYTES.saturating_sub(self.bytes)
    }
}

/// One top-level `$(…)` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// The full `$(…)` text as it appears in the outer command.
    pub text: String,
    /// The inner command, brackets stripped.
    pub inner: String,
}

/// Find every top-level command substitution in `text`, left to right.
pub fn extract_spans(text: &str) -> Vec<Span> {
    if let Some(tree) = try_parse_bash(text) {
        if !tree.root_node().has_error() {
            let mut spans = Vec::new();
            for node in walk_all(&tree) {
                if node.kind() != "command_substitution" {
                    continue;
                }
                // Only top-level spans; nested ones are handled by the
                // recursion into the inner text.
                let mut parent = node.parent();
                let mut nested = false;
                while let Some(p) = parent {
                    if p.kind() == "command_substitution" {
                        nested = true;
                        break;
                    }
                    parent = p.parent();
                }
                if nested {
                    continue;
                }
                let full = node_text(node, text).to_string();
                if let Some(inner) = strip_substitution_brackets(&full) {
                    spans.push(Span { text: full, inner });
                }
            }
            return spans;
        }
    }
    scan_spans(text)
}

fn strip_substitution_brackets(full: &str) -> Option<String> {
    if let Some(rest) = full.strip_prefix("$(") {
        return rest.strip_suffix(')').map(str::to_string);
    }
    // Backtick substitutions survive canonicalization only when flagged, but
    // the grammar still reports them.
    if let Some(rest) = full.strip_prefix('`') {
        return rest.strip_suffix('`').map(str::to_string);
    }
    None
}

/// Paren-balancing fallback. Tracks single-quote regions and backslash
/// parity so `\$(x)` and `'$(x)'` are not treated as substitutions.
fn scan_spans(text: &str) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let close = bytes[i + 1..].iter().position(|&b| b == b'\'');
                i = match close {
                    Some(off) => i + off + 2,
                    None => bytes.len(),
                };
            }
            b'\\' => i = (i + 2).min(bytes.len()),
            b'$' if bytes.get(i + 1) == Some(&b'(') && bytes.get(i + 2) != Some(&b'(') => {
                match find_close_paren(bytes, i + 2) {
                    Some(close) => {
                        spans.push(Span {
                            text: text[i..close + 1].to_string(),
                            inner: text[i + 2..close].to_string(),
                        });
                        i = close + 1;
                    }
                    None => break, // unterminated; nothing more to find
                }
            }
            _ => i += 1,
        }
    }

    spans
}

fn find_close_paren(bytes: &[u8], mut from: usize) -> Option<usize> {
    let mut depth = 1usize;
    while from < bytes.len() {
        match bytes[from] {
            b'\\' => from += 2,
            b'\'' => {
                let close = bytes[from + 1..].iter().position(|&b| b == b'\'')?;
                from += close + 2;
            }
            b'(' => {
                depth += 1;
                from += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from);
                }
                from += 1;
            }
            _ => from += 1,
        }
    }
    None
}

/// Detect the simple-file-read fast path: `cat F`, `head F`, `tail F` or
/// `<F`. These are read directly instead of executed.
pub fn simple_read_target(inner: &str) -> Option<String> {
    let trimmed = inner.trim();
    if let Some(rest) = trimmed.strip_prefix('<') {
        let file = rest.trim();
        if !file.is_empty() && !file.contains(char::is_whitespace) {
            return Some(file.to_string());
        }
        return None;
    }
    let tokens = lexer::tokenize(trimmed).ok()?;
    match tokens.as_slice() {
        [cmd, file]
            if matches!(cmd.text.as_str(), "cat" | "head" | "tail")
                && !file.text.starts_with('-') =>
        {
            Some(file.text.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_top_level_spans_only() {
        let spans = extract_spans("echo $(cat $(find_name)) and $(date)");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "$(cat $(find_name))");
        assert_eq!(spans[0].inner, "cat $(find_name)");
        assert_eq!(spans[1].inner, "date");
    }

    #[test]
    fn no_spans_in_plain_text() {
        assert!(extract_spans("ls -la /tmp").is_empty());
    }

    #[test]
    fn single_quoted_spans_are_literal() {
        assert!(extract_spans("echo '$(id)'").is_empty());
    }

    #[test]
    fn escaped_dollar_is_not_a_span() {
        assert!(scan_spans(r"echo \$(id)").is_empty());
    }

    #[test]
    fn arithmetic_expansion_is_not_a_span() {
        assert!(scan_spans("echo $((1+2))").is_empty());
    }

    #[test]
    fn scanner_handles_unparseable_text() {
        // Force the fallback with input the grammar rejects.
        let spans = scan_spans("(((( $(id)");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].inner, "id");
    }

    #[test]
    fn scanner_tracks_nested_parens() {
        let spans = scan_spans("echo $(echo (a) b)");
        assert_eq!(spans[0].inner, "echo (a) b");
    }

    #[test]
    fn unterminated_span_yields_nothing() {
        assert!(scan_spans("echo $(oops").is_empty());
    }

    #[test]
    fn simple_read_forms() {
        assert_eq!(simple_read_target("cat /tmp/pl.py"), Some("/tmp/pl.py".into()));
        assert_eq!(simple_read_target("head notes.txt"), Some("notes.txt".into()));
        assert_eq!(simple_read_target(" tail log "), Some("log".into()));
        assert_eq!(simple_read_target("</etc/hostname"), Some("/etc/hostname".into()));
        assert_eq!(simple_read_target("< spaced path"), None);
        assert_eq!(simple_read_target("cat -n file"), None);
        assert_eq!(simple_read_target("cat a b"), None);
        assert_eq!(simple_read_target("curl http://x"), None);
        assert_eq!(simple_read_target("rm file"), None);
    }

    #[test]
    fn budget_arithmetic() {
        let mut b = BudgetState::default();
        assert_eq!(b.remaining_bytes(), MAX_BYTES);
        b.bytes = MAX_BYTES - 10;
        assert_eq!(b.remaining_bytes(), 10);
        b.bytes = MAX_BYTES + 1;
        assert_eq!(b.remaining_bytes(), 0);
    }
}
