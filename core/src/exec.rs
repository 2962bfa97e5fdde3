//! Child process launching.
//!
//! Every validated command runs as `/bin/bash --norc --noprofile -c
//! <wrapped>` with the sanitized environment and the sandbox launch context
//! applied before exec. The wrapped command re-establishes `$?`, runs the
//! user command, then streams `env -0` over fd 3 so the session can commit
//! the child's final environment and working directory before the next
//! prompt.

use std::collections::HashMap;
use std::io::Read;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::Notify;

use crate::error::AegishErr;
use crate::error::Result;
use crate::sandbox::LaunchCtx;

const BASH: &str = "/bin/bash";

/// Conventional fd the env-capture pipe occupies in the child.
const ENV_CAPTURE_FD: i32 = 3;

/// Sentinel separating user output (if any leaked to fd 3) from our capture.
const ENV_SENTINEL: &[u8] = b"\0ENV\0";

/// Exit codes for children we had to kill.
const TIMEOUT_EXIT_CODE: i32 = 124;
const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone)]
pub struct ExecParams {
    /// The validated command text, passed to `bash -c` verbatim.
    pub command: String,
    pub cwd: PathBuf,
    /// Already-sanitized environment (see [`crate::exec_env`]).
    pub env: HashMap<String, String>,
    pub last_exit_code: i32,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ExecOutcome {
    pub exit_code: i32,
    /// The child's final environment; `None` when capture failed or the
    /// child was killed.
    pub env: Option<HashMap<String, String>>,
    /// The child's final working directory (`PWD`), when captured.
    pub cwd: Option<PathBuf>,
    pub timed_out: bool,
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    /// True when stdout exceeded the caller's byte cap.
    pub truncated: bool,
}

/// Run a top-level command interactively: stdio inherited, environment and
/// cwd captured afterwards.
pub async fn run_interactive(
    params: ExecParams,
    launch_ctx: LaunchCtx,
    ctrl_c: Arc<Notify>,
) -> Result<ExecOutcome> {
    let wrapped = wrap_command(&params.command, params.last_exit_code);

    let (reader, writer) = std::io::pipe()?;
    let writer_fd = writer.as_raw_fd();

    let mut cmd = Command::new(BASH);
    cmd.arg("--norc")
        .arg("--noprofile")
        .arg("-c")
        .arg(&wrapped)
        .current_dir(&params.cwd)
        .env_clear()
        .envs(&params.env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    unsafe {
        cmd.pre_exec(move || {
            // dup2 clears CLOEXEC on the target fd, which is exactly what
            // lets the child inherit only this one descriptor.
            if unsafe { libc::dup2(writer_fd, ENV_CAPTURE_FD) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            unsafe { launch_ctx.apply() }
        });
    }

    let mut child = cmd.kill_on_drop(true).spawn()?;
    // The parent must close its copy of the write end or the drain below
    // would never see EOF.
    drop(writer);

    // Drain concurrently with the wait: a child with a large environment
    // would otherwise deadlock against the pipe buffer.
    let drain = tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    });

    let interrupted = ctrl_c.notified();
    let mut timeout_fut = sleep_or_forever(params.timeout);

    let (exit_code, timed_out, was_interrupted) = tokio::select! {
        status = child.wait() => {
            let status = status?;
            (exit_status_code(status), false, false)
        }
        _ = &mut timeout_fut => {
            child.start_kill()?;
            let _ = child.wait().await;
            (TIMEOUT_EXIT_CODE, true, false)
        }
        _ = interrupted => {
            child.start_kill()?;
            let _ = child.wait().await;
            (INTERRUPT_EXIT_CODE, false, true)
        }
    };

    let captured = drain.await?;
    let (env, cwd) = if timed_out || was_interrupted {
        // State updates from a killed command are discarded.
        (None, None)
    } else {
        parse_env_capture(&captured)
    };

    Ok(ExecOutcome {
        exit_code,
        env,
        cwd,
        timed_out,
        interrupted: was_interrupted,
    })
}

/// Run an inner substitution command with stdout captured and bounded. No
/// env capture; the inner command cannot mutate the session.
pub async fn run_captured(
    params: ExecParams,
    launch_ctx: LaunchCtx,
    max_stdout: usize,
) -> Result<CapturedOutput> {
    let mut cmd = Command::new(BASH);
    cmd.arg("--norc")
        .arg("--noprofile")
        .arg("-c")
        .arg(&params.command)
        .current_dir(&params.cwd)
        .env_clear()
        .envs(&params.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    unsafe {
        cmd.pre_exec(move || unsafe { launch_ctx.apply() });
    }

    let mut child = cmd.kill_on_drop(true).spawn()?;
    let stdout = child.stdout.take().ok_or_else(|| {
        AegishErr::Io(std::io::Error::other(
            "stdout pipe was unexpectedly not available",
        ))
    })?;
    let reader = tokio::spawn(read_capped(BufReader::new(stdout), max_stdout + 1));

    let timeout = params.timeout.unwrap_or(Duration::from_secs(5));
    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            child.start_kill()?;
            let _ = child.wait().await;
            return Err(AegishErr::Timeout);
        }
    };

    let stdout = reader.await??;
    let truncated = stdout.len() > max_stdout;

    Ok(CapturedOutput {
        exit_code: exit_status_code(status),
        stdout,
        truncated,
    })
}

fn wrap_command(command: &str, last_exit_code: i32) -> String {
    format!(
        "(exit {last_exit_code}); {command}\n__aegish_status=$?\nprintf '\\0ENV\\0' >&{fd}\nenv -0 >&{fd}\nexit $__aegish_status",
        fd = ENV_CAPTURE_FD,
    )
}

fn sleep_or_forever(
    timeout: Option<Duration>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    match timeout {
        Some(d) => Box::pin(tokio::time::sleep(d)),
        None => Box::pin(std::future::pending()),
    }
}

fn exit_status_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Split the drained pipe on the sentinel and rebuild the child's final
/// environment. The last sentinel wins: the user command finished before our
/// `printf` ran, so anything it may have pushed to fd 3 sits in front.
fn parse_env_capture(captured: &[u8]) -> (Option<HashMap<String, String>>, Option<PathBuf>) {
    let Some(pos) = find_last(captured, ENV_SENTINEL) else {
        return (None, None);
    };
    let tail = &captured[pos + ENV_SENTINEL.len()..];

    let mut env = HashMap::new();
    for record in tail.split(|&b| b == 0) {
        if record.is_empty() {
            continue;
        }
        let Ok(record) = std::str::from_utf8(record) else {
            continue;
        };
        if let Some((key, value)) = record.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    if env.is_empty() {
        return (None, None);
    }

    let cwd = env.get("PWD").map(PathBuf::from).filter(|p| p.is_dir());
    (Some(env), cwd)
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&ix| &haystack[ix..ix + needle.len()] == needle)
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max_output: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(max_output.min(8 * 1024));
    let mut tmp = [0u8; 8192];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if buf.len() < max_output {
            let take = n.min(max_output - buf.len());
            buf.extend_from_slice(&tmp[..take]);
        }
        // Keep reading to EOF so the child never blocks on a full pipe.
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use maplit::hashmap;

    fn params(command: &str) -> ExecParams {
        ExecParams {
            command: command.to_string(),
            cwd: std::env::temp_dir(),
            env: hashmap! {
                "PATH".to_string() => "/usr/bin:/bin".to_string(),
                "HOME".to_string() => std::env::temp_dir().display().to_string(),
            },
            last_exit_code: 0,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    fn unsandboxed() -> LaunchCtx {
        LaunchCtx::new(false)
    }

    #[tokio::test]
    async fn captures_exit_code_and_env() {
        let ctrl_c = Arc::new(Notify::new());
        let out = run_interactive(
            params("AEGISH_PROBE=42 true"),
            unsandboxed(),
            ctrl_c,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, 0);
        let env = out.env.unwrap();
        assert!(env.contains_key("PWD"));
    }

    #[tokio::test]
    async fn exported_variables_survive_into_the_next_view() {
        let ctrl_c = Arc::new(Notify::new());
        let out = run_interactive(params("export AEGISH_MARK=yes"), unsandboxed(), ctrl_c)
            .await
            .unwrap();
        let env = out.env.unwrap();
        assert_eq!(env.get("AEGISH_MARK").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn cd_updates_the_captured_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().canonicalize().unwrap();
        let ctrl_c = Arc::new(Notify::new());
        let out = run_interactive(
            params(&format!("cd {}", target.display())),
            unsandboxed(),
            ctrl_c,
        )
        .await
        .unwrap();
        assert_eq!(out.cwd.unwrap(), target);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_propagated() {
        let ctrl_c = Arc::new(Notify::new());
        let out = run_interactive(params("exit 7"), unsandboxed(), ctrl_c)
            .await
            .unwrap();
        assert_eq!(out.exit_code, 7);
    }

    #[tokio::test]
    async fn previous_exit_code_is_visible_to_the_command() {
        let ctrl_c = Arc::new(Notify::new());
        let mut p = params("exit $?");
        p.last_exit_code = 3;
        let out = run_interactive(p, unsandboxed(), ctrl_c).await.unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_kills_the_child_with_124() {
        let ctrl_c = Arc::new(Notify::new());
        let mut p = params("sleep 5");
        p.timeout = Some(Duration::from_millis(100));
        let out = run_interactive(p, unsandboxed(), ctrl_c).await.unwrap();
        assert_eq!(out.exit_code, 124);
        assert!(out.timed_out);
        assert!(out.env.is_none());
    }

    #[tokio::test]
    async fn captured_stdout_is_returned() {
        let out = run_captured(params("printf hello"), unsandboxed(), 1024)
            .await
            .unwrap();
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.exit_code, 0);
        assert!(!out.truncated);
    }

    #[tokio::test]
    async fn captured_stdout_is_capped() {
        let out = run_captured(params("yes | head -c 10000"), unsandboxed(), 64)
            .await
            .unwrap();
        assert!(out.truncated);
        assert_eq!(out.stdout.len(), 65);
    }

    #[tokio::test]
    async fn captured_timeout_is_an_error() {
        let mut p = params("sleep 5");
        p.timeout = Some(Duration::from_millis(100));
        let err = run_captured(p, unsandboxed(), 1024).await.unwrap_err();
        assert!(matches!(err, AegishErr::Timeout));
    }

    #[test]
    fn env_capture_parses_the_tail_after_the_last_sentinel() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"user junk");
        raw.extend_from_slice(ENV_SENTINEL);
        raw.extend_from_slice(b"forged=1\0");
        raw.extend_from_slice(ENV_SENTINEL);
        raw.extend_from_slice(b"PWD=/tmp\0REAL=yes\0");
        let (env, cwd) = parse_env_capture(&raw);
        let env = env.unwrap();
        assert_eq!(env.get("REAL").map(String::as_str), Some("yes"));
        assert!(!env.contains_key("forged"));
        assert_eq!(cwd.unwrap(), PathBuf::from("/tmp"));
    }

    #[test]
    fn missing_sentinel_yields_no_env() {
        let (env, cwd) = parse_env_capture(b"no sentinel here");
        assert!(env.is_none());
        assert!(cwd.is_none());
    }
}
