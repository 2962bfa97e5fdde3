//! The interactive shell loop.
//!
//! Reads a line, fast-paths `exit` and `cd`, and sends everything else
//! through the validator. Block prints the reason and does nothing; Warn
//! asks `Proceed anyway? [y/N]`; Allow executes. After every execution the
//! session commits the child's captured environment and working directory,
//! so the next command sees the full effect of its predecessor.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tracing::info;
use uuid::Uuid;

use aegish_core::Config;
use aegish_core::LlmClient;
use aegish_core::ModelClient;
use aegish_core::SessionState;
use aegish_core::Validator;
use aegish_core::audit::AuditEmitter;
use aegish_core::exec;
use aegish_core::exec::ExecParams;
use aegish_core::exec_env;
use aegish_core::history::HistoryFile;
use aegish_core::model_provider;
use aegish_core::protocol::DecisionAction;
use aegish_core::protocol::FailMode;
use aegish_core::protocol::Mode;
use aegish_core::sandbox;
use aegish_core::sandbox::LaunchCtx;
use aegish_core::util::notify_on_sigint;

pub fn run(rt: &Runtime, config: Config) -> anyhow::Result<i32> {
    let client = ModelClient::from_available_providers(
        model_provider::built_in_model_providers(),
        config.model.as_deref(),
        config.max_queries_per_minute,
        config.llm_timeout,
    )?;
    let client: Arc<dyn LlmClient> = Arc::new(client);
    let model_name = client.model_name();

    let validator = Validator::new(config.clone(), client);
    let mut audit = AuditEmitter::new(
        config.audit_log.clone(),
        Uuid::new_v4(),
        model_name.clone(),
        config.mode,
    );

    // Ctrl-Z must not drop the operator into an unmonitored parent shell.
    unsafe {
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let ctrl_c = {
        let _guard = rt.enter();
        let ctrl_c = notify_on_sigint();
        let shutdown = Arc::clone(&shutdown);
        let notify = Arc::clone(&ctrl_c);
        tokio::spawn(async move {
            let Ok(mut sigterm) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            sigterm.recv().await;
            info!("SIGTERM received; shutting down");
            shutdown.store(true, Ordering::SeqCst);
            // Kill any running child, give the loop a moment to observe the
            // flag, then exit. History and audit are flushed per write.
            notify.notify_waiters();
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::process::exit(0);
        });
        ctrl_c
    };

    let mut session = SessionState::from_current_process();
    let history_file = HistoryFile::new(config.history_file.clone());

    let mut editor = DefaultEditor::new()?;
    for entry in history_file.load() {
        let _ = editor.add_history_entry(&entry);
        session.push_history(&entry);
    }

    print_banner(&config, &model_name);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let prompt = prompt_for(&session.cwd, &session.env);
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                session.last_exit_code = 130;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("ERROR: {e}");
                break;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        if command == "exit" {
            match config.mode {
                Mode::Production => break,
                Mode::Development => {
                    eprintln!("leaving aegish (development mode); the parent shell is unmonitored");
                    break;
                }
            }
        }

        if command == "cd" || command.starts_with("cd ") {
            let _ = editor.add_history_entry(command);
            handle_cd(command[2..].trim(), &mut session);
            continue;
        }

        let report = rt.block_on(validator.validate(command, &session));
        // Blocked commands are kept out of navigation history entirely.
        if !report.decision.is_block() {
            let _ = editor.add_history_entry(command);
        }
        match report.decision.action {
            DecisionAction::Block => {
                println!("BLOCKED: {}", report.decision.reason);
                audit.emit(command, &report.decision, None);
                // Blocked commands are never persisted.
            }
            DecisionAction::Warn => {
                println!("WARNING: {}", report.decision.reason);
                let confirmed = match editor.readline("Proceed anyway? [y/N] ") {
                    Ok(answer) => matches!(answer.trim(), "y" | "Y" | "yes" | "YES"),
                    Err(_) => false,
                };
                audit.emit(command, &report.decision, Some(confirmed));
                if confirmed {
                    execute(rt, &config, &mut session, command, &ctrl_c);
                }
                remember(&history_file, &mut session, command);
            }
            DecisionAction::Allow => {
                audit.emit(command, &report.decision, None);
                execute(rt, &config, &mut session, command, &ctrl_c);
                remember(&history_file, &mut session, command);
            }
        }
    }

    Ok(0)
}

fn execute(
    rt: &Runtime,
    config: &Config,
    session: &mut SessionState,
    command: &str,
    ctrl_c: &Arc<tokio::sync::Notify>,
) {
    let params = ExecParams {
        command: command.to_string(),
        cwd: session.cwd.clone(),
        env: exec_env::sanitize(&session.env, config.filter_sensitive_vars),
        last_exit_code: session.last_exit_code,
        timeout: config.command_timeout,
    };
    let launch_ctx = LaunchCtx::new(config.mode == Mode::Production);

    match rt.block_on(exec::run_interactive(params, launch_ctx, Arc::clone(ctrl_c))) {
        Ok(outcome) => {
            if outcome.timed_out {
                eprintln!("ERROR: command timed out");
            }
            session.commit(&outcome);
        }
        Err(e) => {
            eprintln!("ERROR: {e}");
            session.last_exit_code = 1;
        }
    }
}

fn remember(history_file: &HistoryFile, session: &mut SessionState, command: &str) {
    session.push_history(command);
    if let Err(e) = history_file.append(command) {
        tracing::warn!("history write failed: {e}");
        eprintln!("WARNING: could not persist history: {e}");
    }
}

/// `cd` runs in-process: resolve, check it is a directory, commit. No
/// subprocess, no model call.
fn handle_cd(arg: &str, session: &mut SessionState) {
    if arg.contains('\0') || arg.chars().any(char::is_control) {
        eprintln!("cd: invalid path");
        session.last_exit_code = 1;
        return;
    }

    let home = session.env.get("HOME").cloned().unwrap_or_else(|| "/".to_string());
    let raw = match arg {
        "" | "~" => home.clone(),
        "-" => match session.env.get("OLDPWD") {
            Some(oldpwd) => oldpwd.clone(),
            None => {
                eprintln!("cd: OLDPWD not set");
                session.last_exit_code = 1;
                return;
            }
        },
        other => {
            let unquoted = strip_matching_quotes(other);
            if let Some(rest) = unquoted.strip_prefix("~/") {
                format!("{home}/{rest}")
            } else {
                unquoted
            }
        }
    };

    let path = if Path::new(&raw).is_absolute() {
        PathBuf::from(&raw)
    } else {
        session.cwd.join(&raw)
    };

    match std::fs::canonicalize(&path) {
        Ok(resolved) if resolved.is_dir() => {
            let previous = session.cwd.display().to_string();
            session.env.insert("OLDPWD".to_string(), previous);
            session
                .env
                .insert("PWD".to_string(), resolved.display().to_string());
            session.cwd = resolved;
            session.last_exit_code = 0;
        }
        Ok(resolved) => {
            eprintln!("cd: {}: not a directory", resolved.display());
            session.last_exit_code = 1;
        }
        Err(e) => {
            eprintln!("cd: {}: {e}", path.display());
            session.last_exit_code = 1;
        }
    }
}

fn strip_matching_quotes(arg: &str) -> String {
    let bytes = arg.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return arg[1..arg.len() - 1].to_string();
        }
    }
    arg.to_string()
}

fn prompt_for(cwd: &Path, env: &std::collections::HashMap<String, String>) -> String {
    let display = match env.get("HOME") {
        Some(home) if cwd.starts_with(home) => {
            let rest = cwd
                .strip_prefix(home)
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            if rest.is_empty() {
                "~".to_string()
            } else {
                format!("~/{rest}")
            }
        }
        _ => cwd.display().to_string(),
    };
    format!("aegish:{display}$ ")
}

fn print_banner(config: &Config, model_name: &str) {
    let sandbox_status = match config.mode {
        Mode::Production => sandbox::ruleset().describe(),
        Mode::Development => "disabled (development mode)".to_string(),
    };
    let mode = match config.mode {
        Mode::Production => "production",
        Mode::Development => "development",
    };
    let fail_mode = match config.fail_mode {
        FailMode::Safe => "safe",
        FailMode::Open => "open",
    };
    println!("aegish {} - security-monitored shell", env!("CARGO_PKG_VERSION"));
    println!("mode: {mode} | fail-mode: {fail_mode} | sandbox: {sandbox_status}");
    println!("model: {model_name}");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn session_at(dir: &Path) -> SessionState {
        let mut session = SessionState::from_current_process();
        session.cwd = dir.to_path_buf();
        session
    }

    #[test]
    fn cd_to_existing_directory_updates_pwd_and_oldpwd() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let mut session = session_at(dir.path());
        let before = session.cwd.display().to_string();
        handle_cd("sub", &mut session);

        assert_eq!(session.cwd, sub.canonicalize().unwrap());
        assert_eq!(session.env.get("OLDPWD"), Some(&before));
        assert_eq!(session.last_exit_code, 0);
    }

    #[test]
    fn cd_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_at(dir.path());
        let before = session.cwd.clone();
        handle_cd("does-not-exist", &mut session);
        assert_eq!(session.cwd, before);
        assert_eq!(session.last_exit_code, 1);
    }

    #[test]
    fn cd_dash_returns_to_oldpwd() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let mut session = session_at(&a.canonicalize().unwrap());
        handle_cd(b.to_str().unwrap(), &mut session);
        assert_eq!(session.cwd, b.canonicalize().unwrap());
        handle_cd("-", &mut session);
        assert_eq!(session.cwd, a.canonicalize().unwrap());
    }

    #[test]
    fn cd_rejects_control_characters() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_at(dir.path());
        handle_cd("evil\x07dir", &mut session);
        assert_eq!(session.last_exit_code, 1);
    }

    #[test]
    fn cd_strips_matching_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("spaced dir");
        std::fs::create_dir(&sub).unwrap();

        let mut session = session_at(dir.path());
        handle_cd("'spaced dir'", &mut session);
        assert_eq!(session.cwd, sub.canonicalize().unwrap());
    }

    #[test]
    fn prompt_substitutes_home_with_tilde() {
        let mut env = std::collections::HashMap::new();
        env.insert("HOME".to_string(), "/home/u".to_string());
        assert_eq!(prompt_for(Path::new("/home/u"), &env), "aegish:~$ ");
        assert_eq!(
            prompt_for(Path::new("/home/u/work"), &env),
            "aegish:~/work$ "
        );
        assert_eq!(prompt_for(Path::new("/etc"), &env), "aegish:/etc$ ");
    }
}
