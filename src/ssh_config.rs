//! SSH client config reconciliation.
//!
//! Unique responsibility: own the managed stanzas inside the user's
//! `~/.ssh/config`, identified by a marker comment line, while leaving every
//! other byte of the file untouched.
//!
//! Non-goals:
//! - Decide which aliases are valid (`prune`'s caller, Pod Manager, owns
//!   that).
//! - Connect to anything; this module only edits text.

#![forbid(unsafe_code)]

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;

/// Prefix identifying a managed stanza's marker line, after leading whitespace.
const MARKER_PREFIX: &str = "# rp:managed ";

/// A parsed `Host` stanza as a half-open line range `[start, end)` into the
/// original line buffer, so every byte outside a managed range is spliced
/// back out verbatim instead of being reconstructed from parsed fields.
#[derive(Debug, Clone)]
struct Stanza {
    /// Index of the `Host ...` line itself.
    start: usize,
    /// Index one past the stanza's last line (the next `Host` line, or EOF).
    end: usize,
    /// Host tokens, e.g. `["foo"]` for `Host foo`, possibly several.
    hosts: Vec<String>,
    /// Whether a line in `(start, end)` carries the managed marker.
    managed: bool,
}

/// Errors from SSH config editing.
#[derive(Debug)]
pub enum SshConfigError {
    /// The file exists but could not be read.
    Io(io::Error),
}

impl fmt::Display for SshConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "ssh config io error: {e}"),
        }
    }
}

impl std::error::Error for SshConfigError {}

impl From<io::Error> for SshConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Editor over a single SSH client config file.
#[derive(Debug)]
pub struct SshConfigEditor {
    path: PathBuf,
}

impl SshConfigEditor {
    /// Bind an editor to `path`. No I/O happens until an operation runs.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Insert or replace the managed stanza for `alias`.
    ///
    /// If a stanza (managed or not) already names `alias` as a host token,
    /// the entire stanza is replaced with a freshly rendered managed block.
    /// Otherwise the block is appended, preceded by a blank line if the file
    /// does not already end in one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or written.
    pub fn upsert(&self, alias: &str, pod_id: &str, hostname: &str, port: u16) -> Result<(), SshConfigError> {
        let raw = read_or_empty(&self.path)?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let stanzas = parse_stanzas(&lines);
        let block = render_block(alias, pod_id, hostname, port);
        let target = stanzas.iter().find(|s| s.hosts.iter().any(|h| h == alias));

        let mut out = String::new();
        let replaced = target.is_some();
        match target {
            Some(stanza) => {
                push_lines(&mut out, &lines[..stanza.start]);
                out.push_str(&block);
                push_lines(&mut out, &lines[stanza.end..]);
            }
            None => {
                push_lines(&mut out, &lines);
                if !out.is_empty() && !out.ends_with("\n\n") {
                    out.push('\n');
                }
                out.push_str(&block);
            }
        }

        write_atomic(&self.path, &out)?;
        tracing::debug!(alias, pod_id, replaced, "upserted managed ssh stanza");
        Ok(())
    }

    /// Delete every managed stanza naming `alias`. Non-managed stanzas with
    /// the same host token are left untouched.
    ///
    /// Returns the number of stanzas removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or written.
    pub fn remove(&self, alias: &str) -> Result<usize, SshConfigError> {
        let raw = read_or_empty(&self.path)?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let stanzas = parse_stanzas(&lines);

        let ranges: Vec<(usize, usize)> = stanzas
            .iter()
            .filter(|s| s.managed && s.hosts.iter().any(|h| h == alias))
            .map(|s| (s.start, s.end))
            .collect();

        if ranges.is_empty() {
            return Ok(0);
        }

        let out = splice_out(&lines, &ranges);
        write_atomic(&self.path, &out)?;
        tracing::debug!(alias, removed = ranges.len(), "removed managed ssh stanza");
        Ok(ranges.len())
    }

    /// Delete every managed stanza whose host tokens are disjoint from
    /// `valid_aliases`.
    ///
    /// Returns the number of stanzas removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or written.
    pub fn prune(&self, valid_aliases: &[String]) -> Result<usize, SshConfigError> {
        let raw = read_or_empty(&self.path)?;
        let lines: Vec<String> = raw.lines().map(str::to_string).collect();
        let stanzas = parse_stanzas(&lines);

        let ranges: Vec<(usize, usize)> = stanzas
            .iter()
            .filter(|s| s.managed && !s.hosts.iter().any(|h| valid_aliases.contains(h)))
            .map(|s| (s.start, s.end))
            .collect();

        if ranges.is_empty() {
            return Ok(0);
        }

        let out = splice_out(&lines, &ranges);
        write_atomic(&self.path, &out)?;
        tracing::debug!(removed = ranges.len(), "pruned stale managed ssh stanzas");
        Ok(ranges.len())
    }
}

fn read_or_empty(path: &Path) -> Result<String, SshConfigError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(SshConfigError::Io(e)),
    }
}

fn host_line_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\s*Host\s+(.+)$").unwrap()
}

/// Find every `Host` stanza as a `[start, end)` line range. Lines before the
/// first `Host` line (global options, `Include` directives) belong to no
/// stanza and are never visited here, so callers that splice by range leave
/// them in place untouched.
fn parse_stanzas(lines: &[String]) -> Vec<Stanza> {
    let host_re = host_line_regex();
    let mut stanzas = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let Some(caps) = host_re.captures(&lines[i]) else {
            i += 1;
            continue;
        };
        let start = i;
        let hosts = caps[1].split_whitespace().map(str::to_string).collect();
        i += 1;
        while i < lines.len() && !host_re.is_match(&lines[i]) {
            i += 1;
        }
        let end = i;
        let managed = lines[start + 1..end]
            .iter()
            .any(|l| l.trim_start().starts_with(MARKER_PREFIX));
        stanzas.push(Stanza { start, end, hosts, managed });
    }

    stanzas
}

fn push_lines(out: &mut String, lines: &[String]) {
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}

/// Re-emit `lines` with every `[start, end)` range in `ranges` cut out,
/// preserving everything else exactly as it was (order, spacing, preamble).
fn splice_out(lines: &[String], ranges: &[(usize, usize)]) -> String {
    let mut out = String::new();
    let mut cur = 0;
    for &(start, end) in ranges {
        push_lines(&mut out, &lines[cur..start]);
        cur = end;
    }
    push_lines(&mut out, &lines[cur..]);
    out
}

fn render_block(alias: &str, pod_id: &str, hostname: &str, port: u16) -> String {
    let updated = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    format!(
        "Host {alias}\n    # rp:managed alias={alias} pod_id={pod_id} updated={updated}\n    HostName {hostname}\n    User root\n    Port {port}\n    IdentitiesOnly yes\n    IdentityFile ~/.ssh/runpod\n"
    )
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), SshConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.to_path_buf();
    let tmp_name = format!(
        ".{}.tmp",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("config")
    );
    tmp.set_file_name(tmp_name);

    fs::write(&tmp, contents)?;
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_into_empty_file_appends_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        let editor = SshConfigEditor::new(&path);

        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert");
        let contents = fs::read_to_string(&path).expect("read");

        assert!(contents.starts_with("Host foo\n"));
        assert!(contents.contains("# rp:managed alias=foo pod_id=pod-1 updated="));
        assert!(contents.contains("HostName 1.2.3.4"));
        assert!(contents.contains("Port 22001"));
    }

    #[test]
    fn upsert_twice_leaves_exactly_one_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        let editor = SshConfigEditor::new(&path);

        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("first upsert");
        editor.upsert("foo", "pod-1", "5.6.7.8", 22002).expect("second upsert");

        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents.matches("Host foo").count(), 1);
        assert!(contents.contains("HostName 5.6.7.8"));
        assert!(!contents.contains("1.2.3.4"));
    }

    #[test]
    fn upsert_preserves_unrelated_stanzas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        fs::write(&path, "Host github.com\n    User git\n    HostName github.com\n").expect("seed");

        let editor = SshConfigEditor::new(&path);
        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert");

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("Host github.com"));
        assert!(contents.contains("User git"));
        assert!(contents.contains("Host foo"));
    }

    #[test]
    fn remove_only_touches_managed_stanzas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        fs::write(&path, "Host foo\n    User someone\n    HostName manual.example\n").expect("seed");

        let editor = SshConfigEditor::new(&path);
        let removed = editor.remove("foo").expect("remove");
        assert_eq!(removed, 0);

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("Host foo"));
        assert!(contents.contains("manual.example"));
    }

    #[test]
    fn remove_deletes_managed_stanza_for_alias() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        let editor = SshConfigEditor::new(&path);
        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert");

        let removed = editor.remove("foo").expect("remove");
        assert_eq!(removed, 1);

        let contents = fs::read_to_string(&path).expect("read");
        assert!(!contents.contains("Host foo"));
    }

    #[test]
    fn prune_removes_stale_managed_stanzas_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        let editor = SshConfigEditor::new(&path);

        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert foo");
        editor.upsert("bar", "pod-2", "5.6.7.8", 22002).expect("upsert bar");

        let removed = editor.prune(&["foo".to_string()]).expect("prune");
        assert_eq!(removed, 1);

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("Host foo"));
        assert!(!contents.contains("Host bar"));
    }

    #[test]
    fn parse_stanzas_splits_multiple_host_tokens() {
        let lines: Vec<String> = "Host foo foo.alias\n    HostName 1.2.3.4\n"
            .lines()
            .map(str::to_string)
            .collect();
        let stanzas = parse_stanzas(&lines);
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].hosts, vec!["foo".to_string(), "foo.alias".to_string()]);
    }

    #[test]
    fn upsert_preserves_leading_global_options() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        fs::write(&path, "Include ~/.ssh/config.d/*\nServerAliveInterval 60\n\nHost github.com\n    User git\n")
            .expect("seed");

        let editor = SshConfigEditor::new(&path);
        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert");

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.starts_with("Include ~/.ssh/config.d/*\nServerAliveInterval 60\n"));
        assert!(contents.contains("Host github.com"));
        assert!(contents.contains("Host foo"));
    }

    #[test]
    fn remove_preserves_leading_global_options() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config");
        let editor = SshConfigEditor::new(&path);
        editor.upsert("foo", "pod-1", "1.2.3.4", 22001).expect("upsert");

        let raw = fs::read_to_string(&path).expect("read");
        fs::write(&path, format!("ServerAliveInterval 60\n\n{raw}")).expect("prepend preamble");

        let removed = editor.remove("foo").expect("remove");
        assert_eq!(removed, 1);

        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.starts_with("ServerAliveInterval 60\n"));
        assert!(!contents.contains("Host foo"));
    }
}
