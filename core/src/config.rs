//! Typed settings.
//!
//! Development mode reads `AEGISH_*` environment variables; production mode
//! loads a root-owned TOML file. Invalid values are fatal at startup, never
//! silently defaulted: a security shell that quietly runs with the wrong
//! mode is worse than one that refuses to start.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AegishErr;
use crate::error::Result;
use crate::protocol::FailMode;
use crate::protocol::Mode;

pub const DEFAULT_MAX_QUERIES_PER_MINUTE: u32 = 30;
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 4096;

/// Root-owned production configuration.
pub const PRODUCTION_CONFIG_PATH: &str = "/etc/aegish/config";

const HISTORY_FILENAME: &str = ".aegish_history";
const STATE_DIRNAME: &str = ".aegish";
const AUDIT_FILENAME: &str = "audit.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub fail_mode: FailMode,
    /// Drop credential-looking variables from child environments.
    pub filter_sensitive_vars: bool,
    pub max_queries_per_minute: u32,
    pub llm_timeout: Duration,
    /// Wall-clock bound per executed command; `None` leaves interactive
    /// commands unbounded.
    pub command_timeout: Option<Duration>,
    pub max_command_length: usize,
    /// Optional model override for the primary provider.
    pub model: Option<String>,
    pub history_file: PathBuf,
    pub audit_log: PathBuf,
}

impl Config {
    /// Entry point: `AEGISH_MODE` (default `development`) selects the
    /// loader.
    pub fn load() -> Result<Config> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let mode = match vars.get("AEGISH_MODE") {
            Some(raw) => raw.parse::<Mode>().map_err(AegishErr::ConfigInvalid)?,
            None => Mode::Development,
        };
        match mode {
            Mode::Development => Config::from_env_map(&vars),
            Mode::Production => Config::from_file(Path::new(PRODUCTION_CONFIG_PATH)),
        }
    }

    /// Development-mode loader over an explicit variable map (testable
    /// without touching the process environment).
    pub fn from_env_map(vars: &HashMap<String, String>) -> Result<Config> {
        let fail_mode = match vars.get("AEGISH_FAIL_MODE") {
            Some(raw) => raw.parse::<FailMode>().map_err(AegishErr::ConfigInvalid)?,
            None => FailMode::Safe,
        };
        let filter_sensitive_vars = match vars.get("AEGISH_FILTER_SENSITIVE_VARS") {
            Some(raw) => parse_bool("AEGISH_FILTER_SENSITIVE_VARS", raw)?,
            None => true,
        };
        let max_queries_per_minute = match vars.get("AEGISH_MAX_QUERIES_PER_MINUTE") {
            Some(raw) => parse_number("AEGISH_MAX_QUERIES_PER_MINUTE", raw)?,
            None => DEFAULT_MAX_QUERIES_PER_MINUTE,
        };
        let llm_timeout = match vars.get("AEGISH_LLM_TIMEOUT_SECONDS") {
            Some(raw) => {
                Duration::from_secs(parse_number("AEGISH_LLM_TIMEOUT_SECONDS", raw)?)
            }
            None => DEFAULT_LLM_TIMEOUT,
        };
        let command_timeout = match vars.get("AEGISH_COMMAND_TIMEOUT_SECONDS") {
            Some(raw) => Some(Duration::from_secs(parse_number(
                "AEGISH_COMMAND_TIMEOUT_SECONDS",
                raw,
            )?)),
            None => None,
        };

        Ok(Config {
            mode: Mode::Development,
            fail_mode,
            filter_sensitive_vars,
            max_queries_per_minute,
            llm_timeout,
            command_timeout,
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            model: vars.get("AEGISH_MODEL").cloned(),
            history_file: home_dir().join(HISTORY_FILENAME),
            audit_log: home_dir().join(STATE_DIRNAME).join(AUDIT_FILENAME),
        })
    }

    /// Production-mode loader. Fails hard unless the file exists, is owned
    /// by root and is neither group- nor world-writable.
    pub fn from_file(path: &Path) -> Result<Config> {
        check_production_permissions(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            AegishErr::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let parsed = Config::parse_toml(&content)?;
        Ok(parsed)
    }

    /// Parse the production file body. Split out so the syntax is testable
    /// without a root-owned fixture.
    pub fn parse_toml(content: &str) -> Result<Config> {
        let raw: ConfigToml = toml::from_str(content)
            .map_err(|e| AegishErr::ConfigInvalid(format!("invalid config file: {e}")))?;

        let fail_mode = match raw.fail_mode.as_deref() {
            Some(s) => s.parse::<FailMode>().map_err(AegishErr::ConfigInvalid)?,
            None => FailMode::Safe,
        };

        Ok(Config {
            mode: Mode::Production,
            fail_mode,
            filter_sensitive_vars: raw.filter_sensitive_vars.unwrap_or(true),
            max_queries_per_minute: raw
                .max_queries_per_minute
                .unwrap_or(DEFAULT_MAX_QUERIES_PER_MINUTE),
            llm_timeout: Duration::from_secs(
                raw.llm_timeout_seconds.unwrap_or(DEFAULT_LLM_TIMEOUT.as_secs()),
            ),
            command_timeout: raw.command_timeout_seconds.map(Duration::from_secs),
            max_command_length: raw
                .max_command_length
                .unwrap_or(DEFAULT_MAX_COMMAND_LENGTH),
            model: raw.model,
            history_file: home_dir().join(HISTORY_FILENAME),
            audit_log: raw
                .audit_log
                .unwrap_or_else(|| home_dir().join(STATE_DIRNAME).join(AUDIT_FILENAME)),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    fail_mode: Option<String>,
    filter_sensitive_vars: Option<bool>,
    max_queries_per_minute: Option<u32>,
    llm_timeout_seconds: Option<u64>,
    command_timeout_seconds: Option<u64>,
    max_command_length: Option<usize>,
    model: Option<String>,
    audit_log: Option<PathBuf>,
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(AegishErr::ConfigInvalid(format!(
            "invalid {name} {other:?} (expected \"true\" or \"false\")"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        AegishErr::ConfigInvalid(format!("invalid {name} {raw:?} (expected an integer)"))
    })
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
}

#[cfg(unix)]
fn check_production_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| {
        AegishErr::ConfigInvalid(format!(
            "production config {} is not readable: {e}",
            path.display()
        ))
    })?;
    if metadata.uid() != 0 {
        return Err(AegishErr::ConfigInvalid(format!(
            "production config {} must be owned by root",
            path.display()
        )));
    }
    let perm_bits = metadata.permissions().mode() & 0o022;
    if perm_bits != 0 {
        return Err(AegishErr::ConfigInvalid(format!(
            "production config {} must not be group- or world-writable",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_production_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn development_defaults() {
        let c = Config::from_env_map(&vars(&[])).unwrap();
        assert_eq!(c.mode, Mode::Development);
        assert_eq!(c.fail_mode, FailMode::Safe);
        assert!(c.filter_sensitive_vars);
        assert_eq!(c.max_queries_per_minute, 30);
        assert_eq!(c.llm_timeout, Duration::from_secs(30));
        assert!(c.command_timeout.is_none());
        assert_eq!(c.max_command_length, 4096);
    }

    #[test]
    fn development_overrides() {
        let c = Config::from_env_map(&vars(&[
            ("AEGISH_FAIL_MODE", "open"),
            ("AEGISH_FILTER_SENSITIVE_VARS", "false"),
            ("AEGISH_MAX_QUERIES_PER_MINUTE", "5"),
            ("AEGISH_LLM_TIMEOUT_SECONDS", "10"),
            ("AEGISH_COMMAND_TIMEOUT_SECONDS", "60"),
        ]))
        .unwrap();
        assert_eq!(c.fail_mode, FailMode::Open);
        assert!(!c.filter_sensitive_vars);
        assert_eq!(c.max_queries_per_minute, 5);
        assert_eq!(c.command_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn invalid_values_are_fatal_not_defaulted() {
        assert!(Config::from_env_map(&vars(&[("AEGISH_FAIL_MODE", "wide-open")])).is_err());
        assert!(
            Config::from_env_map(&vars(&[("AEGISH_FILTER_SENSITIVE_VARS", "yes")])).is_err()
        );
        assert!(
            Config::from_env_map(&vars(&[("AEGISH_MAX_QUERIES_PER_MINUTE", "lots")])).is_err()
        );
    }

    #[test]
    fn invalid_mode_is_fatal() {
        assert!("staging".parse::<Mode>().is_err());
    }

    #[test]
    fn production_toml_parses() {
        let c = Config::parse_toml(
            r#"
fail_mode = "open"
max_queries_per_minute = 10
llm_timeout_seconds = 15
model = "gpt-4o-mini"
audit_log = "/var/log/aegish/audit.log"
"#,
        )
        .unwrap();
        assert_eq!(c.mode, Mode::Production);
        assert_eq!(c.fail_mode, FailMode::Open);
        assert_eq!(c.max_queries_per_minute, 10);
        assert_eq!(c.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(c.audit_log, PathBuf::from("/var/log/aegish/audit.log"));
    }

    #[test]
    fn production_toml_rejects_bad_values() {
        assert!(Config::parse_toml("fail_mode = \"never\"").is_err());
        assert!(Config::parse_toml("max_queries_per_minute = \"many\"").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn production_file_ownership_is_enforced() {
        // A file owned by the test user is rejected unless the tests run as
        // root, in which case the writable-bits check still applies.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "fail_mode = \"safe\"\n").unwrap();

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
