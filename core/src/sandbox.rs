//! Kernel-enforced execute restrictions for child processes.
//!
//! One Landlock ruleset per process, created lazily on first use and cached
//! for the life of the process (the kernel closes the descriptor at exit).
//! The ruleset handles only the EXECUTE access right. Landlock is
//! grant-only, so "deny the shells" is expressed by granting execute beneath
//! every top-level directory except the shell directories, which are granted
//! per entry minus the deny list.
//!
//! The monitored child itself runs `/bin/bash`, so that one path receives an
//! explicit grant; on merged-/usr systems the interpreter inode therefore
//! stays executable. Every other listed shell is denied to the child and all
//! of its descendants. This sits alongside the already-acknowledged
//! limitation that path-based denial does not cover copied binaries.
//!
//! Application order inside each child, before exec: set no-new-privs, then
//! `landlock_restrict_self`. Both are irrevocable and inherited.

use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub enum SandboxStatus {
    /// Ruleset created; `fd` stays open for process lifetime.
    Active { fd: i32 },
    /// Landlock unusable; the reason is surfaced in the startup banner.
    Unavailable { reason: String },
}

impl SandboxStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SandboxStatus::Active { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            SandboxStatus::Active { .. } => "active (interpreter exempt)".to_string(),
            SandboxStatus::Unavailable { reason } => format!("unavailable: {reason}"),
        }
    }
}

static RULESET: OnceLock<SandboxStatus> = OnceLock::new();

/// Lazily create (once) and return the process-wide ruleset status.
pub fn ruleset() -> &'static SandboxStatus {
    RULESET.get_or_init(imp::build_ruleset)
}

/// Everything a child needs in its `pre_exec` hook. `None` for the fd means
/// the ruleset step is skipped (development mode or degraded kernel); the
/// no-new-privs attribute is still set.
#[derive(Debug, Clone, Copy)]
pub struct LaunchCtx {
    ruleset_fd: Option<i32>,
}

impl LaunchCtx {
    /// Build the launch context for a child. When `enforce` is false (or the
    /// ruleset is unavailable) only no-new-privs is applied.
    pub fn new(enforce: bool) -> Self {
        let ruleset_fd = if enforce {
            match ruleset() {
                SandboxStatus::Active { fd } => Some(*fd),
                SandboxStatus::Unavailable { .. } => None,
            }
        } else {
            None
        };
        LaunchCtx { ruleset_fd }
    }

    pub fn sandboxed(&self) -> bool {
        self.ruleset_fd.is_some()
    }

    /// Apply the restrictions to the calling process. Runs between `fork`
    /// and `exec`; only raw syscalls, no allocation.
    ///
    /// # Safety
    /// Must only be called from a `pre_exec` hook.
    pub unsafe fn apply(&self) -> std::io::Result<()> {
        imp::apply(self.ruleset_fd)
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use super::SandboxStatus;
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use tracing::debug;
    use tracing::warn;

    const LANDLOCK_ACCESS_FS_EXECUTE: u64 = 1 << 0;
    const LANDLOCK_CREATE_RULESET_VERSION: u32 = 1 << 0;
    const LANDLOCK_RULE_PATH_BENEATH: libc::c_int = 1;

    #[repr(C)]
    struct LandlockRulesetAttr {
        handled_access_fs: u64,
    }

    #[repr(C, packed)]
    struct LandlockPathBeneathAttr {
        allowed_access: u64,
        parent_fd: libc::c_int,
    }

    /// Shells whose execution the ruleset withholds.
    const SHELL_NAMES: &[&str] = &[
        "bash", "sh", "dash", "zsh", "ksh", "csh", "tcsh", "fish", "ash", "mksh", "rbash",
        "busybox",
    ];

    /// Directories that may contain the listed shells; granted per entry.
    const SHELL_DIRS: &[&str] = &[
        "/bin",
        "/sbin",
        "/usr/bin",
        "/usr/sbin",
        "/usr/local/bin",
        "/usr/local/sbin",
    ];

    /// The interpreter the executor launches; must stay executable.
    const INTERPRETER: &str = "/bin/bash";

    // All landlock syscalls return a 64-bit signed value; errno carries the
    // failure cause.
    unsafe fn landlock_create_ruleset(
        attr: *const LandlockRulesetAttr,
        size: usize,
        flags: u32,
    ) -> i64 {
        unsafe {
            libc::syscall(
                libc::SYS_landlock_create_ruleset,
                attr,
                size,
                flags as libc::c_uint,
            )
        }
    }

    unsafe fn landlock_add_rule(
        ruleset_fd: i32,
        rule_type: libc::c_int,
        attr: *const LandlockPathBeneathAttr,
        flags: u32,
    ) -> i64 {
        unsafe {
            libc::syscall(
                libc::SYS_landlock_add_rule,
                ruleset_fd,
                rule_type,
                attr,
                flags as libc::c_uint,
            )
        }
    }

    unsafe fn landlock_restrict_self(ruleset_fd: i32, flags: u32) -> i64 {
        unsafe { libc::syscall(libc::SYS_landlock_restrict_self, ruleset_fd, flags as libc::c_uint) }
    }

    pub(super) fn build_ruleset() -> SandboxStatus {
        // ABI probe: a negative return means no Landlock at all.
        let abi = unsafe {
            landlock_create_ruleset(std::ptr::null(), 0, LANDLOCK_CREATE_RULESET_VERSION)
        };
        if abi < 1 {
            return SandboxStatus::Unavailable {
                reason: format!(
                    "kernel without landlock support ({})",
                    io::Error::last_os_error()
                ),
            };
        }

        let attr = LandlockRulesetAttr {
            handled_access_fs: LANDLOCK_ACCESS_FS_EXECUTE,
        };
        let fd = unsafe {
            landlock_create_ruleset(&attr, std::mem::size_of::<LandlockRulesetAttr>(), 0)
        };
        if fd < 0 {
            return SandboxStatus::Unavailable {
                reason: format!("ruleset creation failed ({})", io::Error::last_os_error()),
            };
        }
        let fd = fd as i32;

        let mut granted = 0usize;
        grant_under(fd, Path::new("/"), &mut granted);
        if let Err(e) = add_execute_rule(fd, Path::new(INTERPRETER)) {
            warn!("failed to grant execute on {INTERPRETER}: {e}");
        }
        debug!("landlock ruleset ready: {granted} execute grants, abi {abi}");

        SandboxStatus::Active { fd }
    }

    /// Grant execute beneath `dir`'s entries, descending into directories
    /// that contain (or are) shell directories.
    fn grant_under(fd: i32, dir: &Path, granted: &mut usize) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let as_str = path.to_string_lossy();
            if SHELL_DIRS.iter().any(|d| *d == as_str) {
                grant_shell_dir(fd, &path, granted);
            } else if SHELL_DIRS
                .iter()
                .any(|d| d.strip_prefix(as_str.as_ref()).is_some_and(|r| r.starts_with('/')))
            {
                grant_under(fd, &path, granted);
            } else if add_execute_rule(fd, &path).is_ok() {
                *granted += 1;
            }
        }
    }

    /// Grant execute on every entry of a shell directory except the listed
    /// shell names themselves.
    fn grant_shell_dir(fd: i32, dir: &Path, granted: &mut usize) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if SHELL_NAMES.contains(&name) {
                continue;
            }
            if add_execute_rule(fd, &entry.path()).is_ok() {
                *granted += 1;
            }
        }
    }

    fn add_execute_rule(ruleset_fd: i32, path: &Path) -> io::Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let parent_fd =
            unsafe { libc::open(c_path.as_ptr(), libc::O_PATH | libc::O_CLOEXEC) };
        if parent_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let attr = LandlockPathBeneathAttr {
            allowed_access: LANDLOCK_ACCESS_FS_EXECUTE,
            parent_fd,
        };
        let rc = unsafe { landlock_add_rule(ruleset_fd, LANDLOCK_RULE_PATH_BENEATH, &attr, 0) };
        let err = io::Error::last_os_error();
        unsafe { libc::close(parent_fd) };
        if rc < 0 { Err(err) } else { Ok(()) }
    }

    /// Runs between `fork` and `exec`; only raw syscalls.
    pub(super) fn apply(ruleset_fd: Option<i32>) -> io::Result<()> {
        let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        if let Some(fd) = ruleset_fd {
            let rc: i64 = unsafe { landlock_restrict_self(fd, 0) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod imp {
    use super::SandboxStatus;
    use std::io;

    pub(super) fn build_ruleset() -> SandboxStatus {
        SandboxStatus::Unavailable {
            reason: "landlock requires linux on x86_64 or aarch64".to_string(),
        }
    }

    pub(super) fn apply(_ruleset_fd: Option<i32>) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruleset_is_created_once_and_cached() {
        let first = ruleset() as *const SandboxStatus;
        let second = ruleset() as *const SandboxStatus;
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_launch_ctx_never_carries_a_ruleset() {
        let ctx = LaunchCtx::new(false);
        assert!(!ctx.sandboxed());
    }

    #[test]
    fn status_description_is_printable() {
        let s = ruleset().describe();
        assert!(!s.is_empty());
    }
}
