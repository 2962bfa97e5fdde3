use reqwest::StatusCode;
use std::io;
use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, AegishErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// The kernel does not support Landlock (or the ABI probe failed).
    #[error("landlock unavailable: {0}")]
    Unavailable(String),

    /// Ruleset creation or rule installation failed.
    #[error("landlock ruleset setup failed: {0}")]
    Setup(io::Error),

    /// `landlock_restrict_self` (or the no-new-privs prctl) failed in the
    /// child after fork.
    #[error("failed to restrict child process: {0}")]
    Restrict(io::Error),

    /// Compiled for an architecture the raw-syscall path does not cover.
    #[error("unsupported architecture for landlock syscalls")]
    UnsupportedArch,
}

#[derive(Error, Debug)]
pub enum AegishErr {
    /// Fatal at startup: bad mode string, unreadable or badly-permissioned
    /// production config, missing credentials.
    #[error("configuration error: {0}")]
    ConfigInvalid(String),

    /// Every provider in the fallback chain failed to yield a well-formed
    /// decision. Consumed by the policy engine (fail-mode rule).
    #[error("all model providers failed to produce a well-formed decision")]
    ProviderUnavailable,

    /// A single provider response could not be used; callers fall through to
    /// the next provider rather than surfacing this.
    #[error("malformed model response: {0}")]
    ResponseMalformed(String),

    /// Child process exceeded its wall-clock budget.
    #[error("command timed out")]
    Timeout,

    /// The operator pressed Ctrl-C while a command or model call was pending.
    #[error("interrupted (Ctrl-C)")]
    Interrupted,

    /// Unexpected HTTP status code from a provider.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    /// Retry limit exceeded against a single provider.
    #[error("exceeded retry limit, last status: {0}")]
    RetryLimit(StatusCode),

    /// Sandbox error
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}
