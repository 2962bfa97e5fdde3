//! Append-only audit log.
//!
//! One newline-delimited JSON event per final decision. The command itself
//! is never stored, only its SHA-256, so the audit trail cannot leak
//! secrets typed at the prompt. Write failures degrade loudly: first a
//! warning, and after five consecutive failures a visible stderr banner.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use tracing::error;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::Decision;
use crate::protocol::DecisionAction;
use crate::protocol::DecisionSource;
use crate::protocol::Mode;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Consecutive failures before the stderr banner.
const FAILURE_BANNER_THRESHOLD: u32 = 5;

#[derive(Serialize)]
struct AuditRecord<'a> {
    ts: u64,
    session: &'a str,
    cmd_sha256: String,
    action: DecisionAction,
    reason: &'a str,
    confidence: f64,
    source: DecisionSource,
    model: &'a str,
    role: &'a str,
    mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    confirmed: Option<bool>,
}

pub struct AuditEmitter {
    path: PathBuf,
    session: String,
    model: String,
    role: String,
    mode: Mode,
    consecutive_failures: u32,
}

impl AuditEmitter {
    pub fn new(path: PathBuf, session_id: Uuid, model: String, mode: Mode) -> Self {
        AuditEmitter {
            path,
            session: session_id.to_string(),
            model,
            role: whoami::username(),
            mode,
            consecutive_failures: 0,
        }
    }

    /// Emit one event. Never raises: an audit failure must not take the
    /// session down, but it must not be silent either.
    pub fn emit(&mut self, command: &str, decision: &Decision, confirmed: Option<bool>) {
        let record = AuditRecord {
            ts: chrono::Utc::now().timestamp().max(0) as u64,
            session: &self.session,
            cmd_sha256: sha256_hex(command),
            action: decision.action,
            reason: &decision.reason,
            confidence: decision.confidence,
            source: decision.source,
            model: &self.model,
            role: &self.role,
            mode: self.mode,
            confirmed,
        };

        match self.write_record(&record) {
            Ok(()) => {
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!("audit write failed ({}): {e}", self.path.display());
                eprintln!("WARNING: audit log write failed: {e}");
                if self.consecutive_failures == FAILURE_BANNER_THRESHOLD {
                    error!(
                        "audit log failing persistently ({} consecutive failures)",
                        self.consecutive_failures
                    );
                    eprintln!(
                        "================================================================"
                    );
                    eprintln!(
                        "WARNING: {} consecutive audit log failures; decisions are NOT being recorded",
                        self.consecutive_failures
                    );
                    eprintln!(
                        "================================================================"
                    );
                }
            }
        }
    }

    fn write_record(&self, record: &AuditRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::other(format!("failed to serialize event: {e}")))?;
        line.push('\n');

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        // One write(2) per record keeps concurrent appends whole.
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

fn sha256_hex(command: &str) -> String {
    let digest = Sha256::digest(command.as_bytes());
    format!("{digest:x}")
}
