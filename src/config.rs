//! On-disk location resolution and provider credential handling.
//!
//! Unique responsibility: know where everything lives on disk, and know how
//! to obtain the provider API key without forcing every caller to re-derive
//! the env → file → prompt lookup chain.
//!
//! Non-goals:
//! - Parse or validate the *contents* of the files it locates (Store and
//!   `SSHConfigEditor` own that).
//! - Decide *when* to prompt interactively; `resolve_api_key` always prompts
//!   if the first two steps come up empty, callers that cannot prompt (the
//!   scheduler tick agent) should populate the credential file or the
//!   environment ahead of time instead.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Directory holding all persisted state for this tool.
///
/// Env: `RP_CONFIG_DIR` overrides the default `~/.config/rp`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(p) = env::var_os("RP_CONFIG_DIR") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("rp")
}

/// Path to the unified Store document.
///
/// Env: `RP_POD_CONFIG_FILE` overrides; falls back to `<config_dir>/pods.json`.
#[must_use]
pub fn pod_config_file() -> PathBuf {
    env::var_os("RP_POD_CONFIG_FILE").map_or_else(|| config_dir().join("pods.json"), PathBuf::from)
}

/// Path to the legacy split schedule file, read-only compatibility input.
#[must_use]
pub fn schedule_file() -> PathBuf {
    env::var_os("RP_SCHEDULE_FILE").map_or_else(|| config_dir().join("schedule.json"), PathBuf::from)
}

/// Path to the persisted provider API key, written with mode 0600.
#[must_use]
pub fn api_key_file() -> PathBuf {
    config_dir().join("runpod_api_key")
}

/// Path to the user's SSH client config file.
#[must_use]
pub fn ssh_config_file() -> PathBuf {
    env::var_os("RP_SSH_CONFIG_FILE").map_or_else(
        || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join("config")
        },
        PathBuf::from,
    )
}

/// Optional user-provided setup scripts, run post-create / post-start.
#[must_use]
pub fn local_setup_script() -> PathBuf {
    config_dir().join("setup_local.sh")
}

/// Optional user-provided remote setup script.
#[must_use]
pub fn remote_setup_script() -> PathBuf {
    config_dir().join("setup_remote.sh")
}

/// Directory for the scheduler's own log output.
#[must_use]
pub fn logs_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library")
        .join("Logs")
}

/// Path to the scheduler's periodic-tick log file.
#[must_use]
pub fn scheduler_log_file() -> PathBuf {
    logs_dir().join("rp-scheduler.log")
}

/// Launchd label for the installed periodic agent.
pub const LAUNCHD_LABEL: &str = "com.rp.scheduler";

/// Directory holding per-user launchd agent definitions.
#[must_use]
pub fn launch_agents_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library")
        .join("LaunchAgents")
}

/// Path to the installed agent's plist.
#[must_use]
pub fn launchd_plist_path() -> PathBuf {
    launch_agents_dir().join(format!("{LAUNCHD_LABEL}.plist"))
}

/// Create the config directory if it does not already exist.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_config_dir_exists() -> io::Result<()> {
    fs::create_dir_all(config_dir())
}

/// Errors from credential resolution.
#[derive(Debug)]
pub enum CredentialError {
    /// No credential was available and the prompt was not completed
    /// (empty input, closed stdin, or interrupted).
    NotProvided,
    /// The credential file or directory could not be read or written.
    Io(io::Error),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotProvided => write!(f, "no RunPod API key provided"),
            Self::Io(e) => write!(f, "credential file error: {e}"),
        }
    }
}

impl std::error::Error for CredentialError {}

impl From<io::Error> for CredentialError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Resolve the provider API key: env var, then credential file, then an
/// interactive hidden prompt whose result is persisted on success.
///
/// # Errors
///
/// Returns [`CredentialError::NotProvided`] if none of the three sources
/// yields a non-empty key, or [`CredentialError::Io`] on file errors.
pub fn resolve_api_key() -> Result<String, CredentialError> {
    if let Ok(key) = env::var("RUNPOD_API_KEY")
        && !key.trim().is_empty()
    {
        tracing::debug!("resolved api key from environment");
        return Ok(key);
    }

    if let Some(key) = read_credential_file(&api_key_file())? {
        tracing::debug!("resolved api key from credential file");
        return Ok(key);
    }

    let key = prompt_hidden("Enter RunPod API key: ")?;
    if key.trim().is_empty() {
        tracing::warn!("no api key provided via environment, file, or prompt");
        return Err(CredentialError::NotProvided);
    }

    persist_credential(&key)?;
    tracing::debug!("resolved api key from interactive prompt, persisted to credential file");
    Ok(key)
}

fn read_credential_file(path: &Path) -> Result<Option<String>, CredentialError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let trimmed = contents.trim().to_string();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed))
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CredentialError::Io(e)),
    }
}

fn persist_credential(key: &str) -> Result<(), CredentialError> {
    ensure_config_dir_exists()?;
    let path = api_key_file();
    let mut f = fs::File::create(&path)?;
    writeln!(f, "{key}")?;

    #[cfg(unix)]
    {
        let mut perms = f.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms)?;
    }

    Ok(())
}

/// Hidden-input prompt. Factored out so the "already have it" branches of
/// [`resolve_api_key`] are exercised without a real terminal in tests.
///
/// Writes to stderr, not stdout, so the prompt never pollutes output piped
/// or captured from this tool's other commands. Falls back to a visible read
/// if stdin is not a terminal (e.g. piped input in a test or a CI job).
fn prompt_hidden(prompt: &str) -> Result<String, CredentialError> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    match rpassword::read_password() {
        Ok(line) => Ok(line.trim().to_string()),
        Err(_) => {
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            Ok(input.trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)]
    fn config_dir_honors_override() {
        // SAFETY (test-only): single-threaded test, restored before return.
        unsafe {
            env::set_var("RP_CONFIG_DIR", "/tmp/rp-test-config-dir");
        }
        assert_eq!(config_dir(), PathBuf::from("/tmp/rp-test-config-dir"));
        unsafe {
            env::remove_var("RP_CONFIG_DIR");
        }
    }

    #[test]
    fn read_credential_file_missing_is_none() {
        let result = read_credential_file(Path::new("/nonexistent/rp-api-key-test"));
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn read_credential_file_trims_whitespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("key");
        fs::write(&path, "  secret-key\n\n").expect("write");
        let result = read_credential_file(&path).expect("read");
        assert_eq!(result, Some("secret-key".to_string()));
    }
}
