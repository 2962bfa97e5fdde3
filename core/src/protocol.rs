//! The decision/data model shared by every pipeline stage.
//!
//! All of these are small serde sums and records; aggregation points match on
//! them exhaustively so a new variant is a compile error everywhere it
//! matters.

use serde::Deserialize;
use serde::Serialize;

/// Most-restrictive ordering: `Allow < Warn < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Allow,
    Warn,
    Block,
}

impl DecisionAction {
    /// Case-folded parse used for model responses. Anything outside the three
    /// known actions is a parse failure, never a demotion to `Warn`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(DecisionAction::Allow),
            "warn" => Some(DecisionAction::Warn),
            "block" => Some(DecisionAction::Block),
            _ => None,
        }
    }
}

/// Which layer produced the final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    #[serde(rename = "blocklist")]
    Blocklist,
    #[serde(rename = "ast")]
    Ast,
    #[serde(rename = "llm")]
    LlmOnly,
    #[serde(rename = "policy")]
    Policy,
}

/// Longest reason we keep; everything past this is cut at a char boundary.
const MAX_REASON_BYTES: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    pub reason: String,
    pub confidence: f64,
    pub source: DecisionSource,
}

impl Decision {
    /// The only constructor. Sanitizes the reason (no ANSI escapes, no
    /// control characters, at most 500 bytes) and forces the confidence into
    /// a finite `[0, 1]` value.
    pub fn new(
        action: DecisionAction,
        reason: impl Into<String>,
        confidence: f64,
        source: DecisionSource,
    ) -> Self {
        Self {
            action,
            reason: sanitize_reason(&reason.into()),
            confidence: clamp_confidence(confidence),
            source,
        }
    }

    pub fn allow(reason: impl Into<String>, confidence: f64, source: DecisionSource) -> Self {
        Self::new(DecisionAction::Allow, reason, confidence, source)
    }

    pub fn warn(reason: impl Into<String>, confidence: f64, source: DecisionSource) -> Self {
        Self::new(DecisionAction::Warn, reason, confidence, source)
    }

    pub fn block(reason: impl Into<String>, confidence: f64, source: DecisionSource) -> Self {
        Self::new(DecisionAction::Block, reason, confidence, source)
    }

    pub fn is_block(&self) -> bool {
        self.action == DecisionAction::Block
    }
}

/// Non-finite confidences are rejected at response parse time; this clamp
/// covers every other construction path.
fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Strip ANSI escape sequences and control characters, then cap the length.
/// A terminal must be able to print a reason verbatim.
pub fn sanitize_reason(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_REASON_BYTES));
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // CSI sequence: ESC [ params final-byte. Other escapes are a
            // single following byte.
            if chars.peek() == Some(&'[') {
                chars.next();
                for f in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&f) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        if c.is_control() {
            // Newlines and tabs become a plain space so multi-line model
            // output stays readable; everything else is dropped.
            if c == '\n' || c == '\t' {
                out.push(' ');
            }
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim();
    let mut end = trimmed.len().min(MAX_REASON_BYTES);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

/// Session mode: production is the login-shell deployment, development the
/// permissive local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "development" => Ok(Mode::Development),
            "production" => Ok(Mode::Production),
            other => Err(format!(
                "invalid mode {other:?} (expected \"development\" or \"production\")"
            )),
        }
    }
}

/// What happens when every model provider fails: `Safe` blocks, `Open`
/// degrades to a confirmable warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Safe,
    Open,
}

impl Default for FailMode {
    fn default() -> Self {
        FailMode::Safe
    }
}

impl std::str::FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "safe" => Ok(FailMode::Safe),
            "open" => Ok(FailMode::Open),
            other => Err(format!(
                "invalid fail mode {other:?} (expected \"safe\" or \"open\")"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionStatus {
    /// Inner command executed (or file read) and stdout captured.
    Resolved,
    /// Inner command validated to Warn; not executed.
    Warned,
    /// Inner command validated to Block; not executed.
    Blocked,
    /// A resolution budget was exceeded or the inner could not be processed.
    Unresolvable,
}

/// One `$(…)` occurrence and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSubstitution {
    /// The literal `$(…)` text from the outer command.
    pub pattern: String,
    pub status: SubstitutionStatus,
    /// Captured stdout (or file bytes) when `Resolved`.
    pub content: Option<String>,
    pub reason: Option<String>,
}

/// Ordered record of every substitution the resolver touched; the policy
/// engine's rules 2, 3 and 6 read it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionLog {
    pub entries: Vec<ResolvedSubstitution>,
}

impl ResolutionLog {
    pub fn push(&mut self, entry: ResolvedSubstitution) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn any_blocked(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.status == SubstitutionStatus::Blocked)
    }

    pub fn any_unresolvable(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.status == SubstitutionStatus::Unresolvable)
    }

    pub fn any_warned(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.status == SubstitutionStatus::Warned)
    }

    pub fn merge(&mut self, other: ResolutionLog) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn action_ordering_is_most_restrictive_last() {
        assert!(DecisionAction::Allow < DecisionAction::Warn);
        assert!(DecisionAction::Warn < DecisionAction::Block);
    }

    #[test]
    fn parse_action_case_folds_and_rejects_unknown() {
        assert_eq!(DecisionAction::parse(" BLOCK "), Some(DecisionAction::Block));
        assert_eq!(DecisionAction::parse("Allow"), Some(DecisionAction::Allow));
        assert_eq!(DecisionAction::parse("deny"), None);
        assert_eq!(DecisionAction::parse(""), None);
    }

    #[test]
    fn reason_is_stripped_of_ansi_and_control_chars() {
        let d = Decision::block(
            "\u{1b}[31mdanger\u{1b}[0m\x07 ahead\r\nnow",
            1.0,
            DecisionSource::Blocklist,
        );
        assert_eq!(d.reason, "danger ahead now");
    }

    #[test]
    fn reason_is_capped_at_500_bytes() {
        let long = "é".repeat(400); // 800 bytes
        let d = Decision::warn(long, 0.5, DecisionSource::Policy);
        assert!(d.reason.len() <= 500);
        assert!(d.reason.is_char_boundary(d.reason.len()));
    }

    #[test]
    fn confidence_is_always_finite_and_clamped() {
        assert_eq!(
            Decision::allow("r", f64::NAN, DecisionSource::LlmOnly).confidence,
            0.0
        );
        assert_eq!(
            Decision::allow("r", f64::INFINITY, DecisionSource::LlmOnly).confidence,
            0.0
        );
        assert_eq!(Decision::allow("r", 7.5, DecisionSource::LlmOnly).confidence, 1.0);
        assert_eq!(Decision::allow("r", -1.0, DecisionSource::LlmOnly).confidence, 0.0);
    }

    #[test]
    fn resolution_log_aggregates() {
        let mut log = ResolutionLog::default();
        assert!(!log.any_blocked());
        log.push(ResolvedSubstitution {
            pattern: "$(true)".into(),
            status: SubstitutionStatus::Blocked,
            content: None,
            reason: Some("nope".into()),
        });
        assert!(log.any_blocked());
        assert!(!log.any_warned());
    }
}
