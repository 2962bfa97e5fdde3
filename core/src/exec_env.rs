//! Child environment construction.
//!
//! The child environment is built as an allowlist: a variable survives only
//! if its name is explicitly allowed or carries an allowed prefix, and even
//! then never if it is on the removal list. The removal list covers every
//! variable that changes what the dynamic linker, bash, or a common
//! interpreter will execute.

use std::collections::HashMap;

/// Names copied through when present.
const ALLOWED_NAMES: &[&str] = &[
    "HOME", "PATH", "USER", "LOGNAME", "TERM", "LANG", "LANGUAGE", "TZ", "PWD", "OLDPWD",
    "SHLVL", "HOSTNAME", "COLUMNS", "LINES",
];

/// Prefixes copied through when present.
const ALLOWED_PREFIXES: &[&str] = &["LC_", "XDG_", "AEGISH_"];

/// Removed on every path, allowlisted or not.
const ALWAYS_REMOVED: &[&str] = &[
    // Dynamic linker.
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "BASH_LOADABLES_PATH",
    // bash startup and parsing hooks.
    "BASH_ENV",
    "ENV",
    "PROMPT_COMMAND",
    "PS0",
    "PS4",
    "SHELLOPTS",
    "BASHOPTS",
    "EXECIGNORE",
    "IFS",
    "CDPATH",
    "GLOBIGNORE",
    // Interpreter library paths.
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PERL5LIB",
    "PERL5OPT",
    "RUBYLIB",
    "NODE_OPTIONS",
    "NODE_PATH",
    "CLASSPATH",
    // Programs other tools will happily exec for us.
    "GIT_PAGER",
    "GIT_SSH_COMMAND",
    "LESSOPEN",
    "MANPAGER",
    "EDITOR",
    "VISUAL",
    "PAGER",
];

/// Name suffixes treated as credentials when sensitive filtering is on.
const SENSITIVE_SUFFIXES: &[&str] = &["_TOKEN", "_SECRET", "_KEY", "_PASSWORD", "_CREDENTIALS"];

/// Build the sanitized child environment from the session's view.
pub fn sanitize(env: &HashMap<String, String>, filter_sensitive: bool) -> HashMap<String, String> {
    env.iter()
        .filter(|(name, _)| is_allowed(name, filter_sensitive))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn is_allowed(name: &str, filter_sensitive: bool) -> bool {
    if ALWAYS_REMOVED.contains(&name) || name.starts_with("BASH_FUNC_") {
        return false;
    }
    if filter_sensitive && SENSITIVE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return false;
    }
    ALLOWED_NAMES.contains(&name) || ALLOWED_PREFIXES.iter().any(|p| name.starts_with(p))
}
