//! Per-session mutable state.
//!
//! The session's environment and working directory are *re-captured from the
//! child after every successful execution* and replace the parent's view, so
//! a command always sees the full effect of its predecessor.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::exec::ExecOutcome;

/// In-memory ring backing up-arrow navigation; the persistent history file
/// is managed separately and never sees blocked commands.
const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub last_exit_code: i32,
    pub history: VecDeque<String>,
}

impl SessionState {
    /// Snapshot the parent process's view at startup.
    pub fn from_current_process() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let env = std::env::vars().collect();
        SessionState {
            cwd,
            env,
            last_exit_code: 0,
            history: VecDeque::new(),
        }
    }

    /// Commit a finished execution: exit code always, environment and cwd
    /// only when the capture protocol produced them.
    pub fn commit(&mut self, outcome: &ExecOutcome) {
        self.last_exit_code = outcome.exit_code;
        if let Some(env) = &outcome.env {
            self.env = env.clone();
        }
        if let Some(cwd) = &outcome.cwd {
            self.cwd = cwd.clone();
        }
    }

    pub fn push_history(&mut self, command: &str) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(command.to_string());
    }
}
