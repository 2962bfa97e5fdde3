//! Static regex blocklist.
//!
//! Deterministic, code-enforced refusals that no model verdict can override.
//! Every pattern carries a human-readable label that becomes the decision
//! reason. The set is matched against the canonical primary text, every
//! brace/glob variant, and again against the post-resolution text.

use std::sync::LazyLock;

use regex::Regex;

use crate::canonical::CanonicalText;
use crate::protocol::Decision;
use crate::protocol::DecisionSource;

struct Pattern {
    regex: Regex,
    label: &'static str,
}

macro_rules! patterns {
    ($(($re:expr, $label:expr)),* $(,)?) => {
        vec![
            $(Pattern {
                // Patterns are written against the regex crate's syntax and
                // covered by tests; a failure to compile is a programming
                // error caught by `blocklist_compiles`.
                regex: match Regex::new($re) {
                    Ok(re) => re,
                    Err(e) => panic!("invalid blocklist pattern {}: {e}", $label),
                },
                label: $label,
            }),*
        ]
    };
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    patterns![
        // Recursive force-removal of the filesystem root, flags combined or
        // separated, short or long form.
        (
            r"(?i)\brm\s+(?:--?\S+\s+)*(?:-\S*r\S*f\S*|-\S*f\S*r\S*)\s+(?:--?\S+\s+)*/(?:\s|\*|$)",
            "recursive force removal of /"
        ),
        (
            r"(?i)\brm\s+(?:--?\S+\s+)*-\S*r\S*\s+(?:--?\S+\s+)*-\S*f\S*\s+(?:--?\S+\s+)*/(?:\s|\*|$)",
            "recursive force removal of /"
        ),
        (
            r"(?i)\brm\s+(?:--?\S+\s+)*-\S*f\S*\s+(?:--?\S+\s+)*-\S*r\S*\s+(?:--?\S+\s+)*/(?:\s|\*|$)",
            "recursive force removal of /"
        ),
        // bash network pseudo-devices.
        (r"/dev/(?:tcp|udp)/", "raw network access via /dev/tcp or /dev/udp"),
        // Reverse shells.
        (
            r"\b(?:nc|ncat|netcat)\b[^|;&\n]*\s-[a-zA-Z]*[ce]\b",
            "netcat with command execution"
        ),
        (
            r"\b(?:nc|ncat|netcat)\b[^|;&\n]*--(?:exec|sh-exec|lua-exec)\b",
            "netcat with command execution"
        ),
        // Piping anything into a shell interpreter.
        (
            r"\|\s*(?:\S*/)?(?:bash|dash|zsh|sh)\b",
            "pipe into a shell interpreter"
        ),
        // Coprocess spawns keep a shell running behind the session's back.
        (r"\bcoproc\b", "coprocess spawn"),
        // Loadable-builtin injection.
        (r"\benable\s+-f\b", "loadable builtin injection via enable -f"),
        // Inline environment assignments that hijack the next exec.
        (
            r"\b(?:BASH_ENV|LD_PRELOAD|LD_LIBRARY_PATH|LD_AUDIT)=",
            "dangerous inline environment assignment"
        ),
        // Sourcing a process substitution executes unseen output.
        (
            r"(?:^|[\s;&|])(?:source|\.)\s+<\(",
            "source of process substitution"
        ),
        (r"(?i)\bsocat\b.*\bexec\b", "socat exec bridge"),
        (r"\bdd\b[^|;&\n]*\bof=/dev/", "dd writing to a raw device"),
        // Fork bomb, canonical and renamed.
        (
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "fork bomb"
        ),
        (
            r"\b\w+\s*\(\s*\)\s*\{\s*\w+\s*\|\s*\w+\s*&\s*;?\s*\}\s*;\s*\w+",
            "fork bomb"
        ),
        // Credential stores.
        (r"/etc/(?:shadow|gshadow|sudoers)\b", "sensitive system file"),
        // Filesystem destruction.
        (r"\bmkfs(?:\.\w+)?\b", "filesystem creation on a device"),
        (r">\s*/dev/(?:sd|hd|nvme|vd)", "redirect onto a raw disk device"),
    ]
});

/// Check one text against every pattern. First hit wins.
pub fn check_text(text: &str) -> Option<Decision> {
    for pattern in PATTERNS.iter() {
        if pattern.regex.is_match(text) {
            return Some(Decision::block(
                pattern.label,
                1.0,
                DecisionSource::Blocklist,
            ));
        }
    }
    None
}

/// Check the canonical primary first, then every variant.
pub fn check_canonical(canonical: &CanonicalText) -> Option<Decision> {
    if let Some(decision) = check_text(&canonical.text) {
        return Some(decision);
    }
    for variant in &canonical.variants {
        if let Some(decision) = check_text(variant) {
            return Some(decision);
        }
    }
    None
}
