//! Persistent command history.
//!
//! Plain text, one command per line, at `~/.aegish_history`. Owner-only
//! permissions are enforced at creation and re-checked on every write;
//! symlinks are refused via `O_NOFOLLOW`; concurrent sessions coordinate
//! through an advisory lock. Blocked commands never reach this file.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Result;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const MAX_LOCK_RETRIES: usize = 10;
const RETRY_SLEEP: Duration = Duration::from_millis(100);

pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new(path: PathBuf) -> Self {
        HistoryFile { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load previous history, newest last. Missing file is empty history.
    pub fn load(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Append one command as a single write. Callers must only pass
    /// commands whose final decision was not Block.
    pub fn append(&self, command: &str) -> Result<()> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
            options.custom_flags(libc::O_NOFOLLOW);
        }

        let mut file = options.open(&self.path)?;
        ensure_owner_only_permissions(&file)?;
        acquire_exclusive_lock_with_retry(&file)?;

        let mut line = command.replace('\n', " ");
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Attempt to acquire an exclusive advisory lock on `file`, retrying a
/// bounded number of times so another session cannot wedge this one.
fn acquire_exclusive_lock_with_retry(file: &File) -> Result<()> {
    for _ in 0..MAX_LOCK_RETRIES {
        match fs2::FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(RETRY_SLEEP);
            }
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::WouldBlock,
        "could not acquire exclusive lock on history file after multiple attempts",
    ))
}

#[cfg(unix)]
fn ensure_owner_only_permissions(file: &File) -> Result<()> {
    let metadata = file.metadata()?;
    let current_mode = metadata.permissions().mode() & 0o777;
    if current_mode != 0o600 {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only_permissions(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn appends_and_loads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryFile::new(dir.path().join("history"));
        history.append("ls -la").unwrap();
        history.append("git status").unwrap();
        assert_eq!(history.load(), vec!["ls -la".to_string(), "git status".to_string()]);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryFile::new(dir.path().join("nope"));
        assert!(history.load().is_empty());
    }

    #[test]
    fn multi_line_commands_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryFile::new(dir.path().join("history"));
        history.append("echo a\necho b").unwrap();
        assert_eq!(history.load(), vec!["echo a echo b".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn file_is_created_owner_only_and_mode_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history");
        let history = HistoryFile::new(path.clone());
        history.append("ls").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        // Loosen the mode behind the writer's back; the next append must
        // restore it.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        history.append("pwd").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_history_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"").unwrap();
        let link = dir.path().join("history");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let history = HistoryFile::new(link);
        assert!(history.append("ls").is_err());
    }
}
