//! Persistent alias/template/task document.
//!
//! Unique responsibility: load the single on-disk JSON document, migrate a
//! legacy flat alias map into the modern tagged shape transparently, surface
//! typed accessors, and save atomically.
//!
//! Non-goals:
//! - Know anything about the remote provider (Pod Manager's job).
//! - Render anything for a human (Command Layer's job).
//!
//! Migration is implicit on read: a legacy document (a flat `{alias: pod_id}`
//! map with none of the modern keys) is exposed as a modern, empty-templates
//! document; the next `save()` persists the modern shape. Unknown top-level
//! keys are preserved round-trip via `extra`, so a downgrade to an older tool
//! doesn't lose data it doesn't understand.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Keys whose presence marks a document as the modern tagged shape.
const MODERN_MARKER_KEYS: [&str; 4] =
    ["aliases", "pod_templates", "scheduled_tasks", "pod_metadata"];

/// Per-alias configuration beyond the bare pod-id mapping.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PodConfig {
    /// Remote working directory used by `cursor`/`shell`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Modern per-alias metadata record.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PodMetadata {
    /// Per-alias configuration, present once any config key has been set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PodConfig>,
}

/// A reusable bundle of pod-creation parameters plus an alias naming pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodTemplate {
    /// Unique template identifier.
    pub identifier: String,
    /// Alias naming pattern; MUST contain the token `{i}`.
    pub alias_template: String,
    /// GPU spec string, e.g. "2xA100".
    pub gpu_spec: String,
    /// Storage spec string, e.g. "500GB".
    pub storage_spec: String,
    /// Optional container-disk spec, overriding the provisioner's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk_spec: Option<String>,
    /// Optional container image, overriding the provisioner's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PodTemplate {
    /// Whether this template's alias pattern contains the required `{i}` token.
    #[must_use]
    pub fn has_index_token(&self) -> bool {
        self.alias_template.contains("{i}")
    }

    /// Render the alias pattern with a concrete index.
    #[must_use]
    pub fn format_alias(&self, index: u32) -> String {
        self.alias_template.replace("{i}", &index.to_string())
    }
}

/// Status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not yet due, or due but not yet processed by a tick.
    Pending,
    /// Fired successfully.
    Completed,
    /// Cancelled by the user before firing.
    Cancelled,
    /// Fired but the underlying action failed; terminal, not retried.
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions are possible).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A deferred action, currently always a pod stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTask {
    /// Globally unique opaque task id.
    pub id: String,
    /// Action kind; only `"stop"` exists today.
    pub action: String,
    /// Alias this task acts on, referenced weakly by name (not by pod-id).
    pub alias: String,
    /// Absolute fire time, UTC unix seconds.
    pub when_epoch: i64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation timestamp, UTC unix seconds.
    pub created_at_epoch: i64,
    /// Error message from the most recent failed attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ScheduledTask {
    /// True iff the task is still pending and its fire time has passed.
    #[must_use]
    pub const fn is_due(&self, now_epoch: i64) -> bool {
        matches!(self.status, TaskStatus::Pending) && self.when_epoch <= now_epoch
    }
}

/// The single on-disk document: aliases, templates, and scheduled tasks.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreDocument {
    /// Flat alias → pod-id map. Always the source of truth for membership,
    /// legacy or modern.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    /// Modern per-alias metadata, keyed by alias.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_metadata: BTreeMap<String, PodMetadata>,
    /// Templates keyed by identifier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_templates: BTreeMap<String, PodTemplate>,
    /// Scheduled tasks, unordered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scheduled_tasks: Vec<ScheduledTask>,
    /// Unrecognized top-level keys, preserved byte-for-byte across a
    /// load/save cycle so an older or newer tool version sharing this file
    /// doesn't lose data it doesn't know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Errors from Store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying I/O failure (not a missing file, which is handled silently).
    Io(io::Error),
    /// Serialization failure while writing.
    Serde(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "store io error: {e}"),
            Self::Serde(e) => write!(f, "store serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// The persistent alias/template/task document, bound to a file path.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    document: StoreDocument,
}

impl Store {
    /// Load the store from `path`, additionally merging in any scheduled
    /// tasks found in a legacy split `schedule.json` at `legacy_schedule_path`
    /// if the primary document carries none of its own.
    ///
    /// Never fails for a missing or corrupt file; genuine I/O errors (e.g.
    /// permission denied) propagate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>, legacy_schedule_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut document = load_document(&path)?;
        if document.scheduled_tasks.is_empty() {
            merge_legacy_schedule_file(&mut document, legacy_schedule_path.as_ref());
        }
        Ok(Self { path, document })
    }

    /// The path this store will write to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every alias → pod-id mapping.
    #[must_use]
    pub fn get_all_aliases(&self) -> BTreeMap<String, String> {
        self.document.aliases.clone()
    }

    /// Look up a single alias.
    #[must_use]
    pub fn get_pod_id(&self, alias: &str) -> Option<&str> {
        self.document.aliases.get(alias).map(String::as_str)
    }

    /// Add or overwrite an alias → pod-id mapping.
    ///
    /// Returns `false` without writing if `alias` already exists and `force`
    /// is false.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn add_alias(&mut self, alias: &str, pod_id: &str, force: bool) -> Result<bool, StoreError> {
        if self.document.aliases.contains_key(alias) && !force {
            return Ok(false);
        }
        self.document.aliases.insert(alias.to_string(), pod_id.to_string());
        self.save()?;
        Ok(true)
    }

    /// Remove an alias, returning its pod-id if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn remove_alias(&mut self, alias: &str) -> Result<Option<String>, StoreError> {
        let removed = self.document.aliases.remove(alias);
        if removed.is_some() {
            self.document.pod_metadata.remove(alias);
            self.save()?;
        }
        Ok(removed)
    }

    /// Add or overwrite a template.
    ///
    /// Returns `false` without writing if `identifier` already exists and
    /// `force` is false.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn add_template(&mut self, template: PodTemplate, force: bool) -> Result<bool, StoreError> {
        if self.document.pod_templates.contains_key(&template.identifier) && !force {
            return Ok(false);
        }
        self.document
            .pod_templates
            .insert(template.identifier.clone(), template);
        self.save()?;
        Ok(true)
    }

    /// Remove a template, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn remove_template(&mut self, identifier: &str) -> Result<Option<PodTemplate>, StoreError> {
        let removed = self.document.pod_templates.remove(identifier);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Look up a template by identifier.
    #[must_use]
    pub fn get_template(&self, identifier: &str) -> Option<&PodTemplate> {
        self.document.pod_templates.get(identifier)
    }

    /// All templates, sorted by identifier.
    #[must_use]
    pub fn list_templates(&self) -> Vec<&PodTemplate> {
        self.document.pod_templates.values().collect()
    }

    /// Smallest positive integer `i` such that `template`'s formatted alias
    /// is not currently in use.
    #[must_use]
    pub fn find_next_alias_index(&self, template: &PodTemplate) -> u32 {
        let mut i: u32 = 1;
        loop {
            let candidate = template.format_alias(i);
            if !self.document.aliases.contains_key(&candidate) {
                return i;
            }
            i = i.saturating_add(1);
        }
    }

    /// Set a per-alias config value, migrating the alias into the richer
    /// per-alias metadata structure on first use. Returns `false` if the
    /// alias does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_pod_config(&mut self, alias: &str, key: &str, value: Option<&str>) -> Result<bool, StoreError> {
        if !self.document.aliases.contains_key(alias) {
            return Ok(false);
        }
        let entry = self.document.pod_metadata.entry(alias.to_string()).or_default();
        let config = entry.config.get_or_insert_with(PodConfig::default);
        match key {
            "path" => config.path = value.map(str::to_string),
            _ => return Ok(false),
        }
        self.save()?;
        Ok(true)
    }

    /// Read a per-alias config value. Returns `None` if the alias is unknown
    /// or has no metadata recorded yet.
    #[must_use]
    pub fn get_pod_config(&self, alias: &str) -> Option<&PodConfig> {
        self.document.pod_metadata.get(alias).and_then(|m| m.config.as_ref())
    }

    /// Append a scheduled task.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn add_scheduled_task(&mut self, task: ScheduledTask) -> Result<(), StoreError> {
        self.document.scheduled_tasks.push(task);
        self.save()
    }

    /// All scheduled tasks.
    #[must_use]
    pub fn scheduled_tasks(&self) -> &[ScheduledTask] {
        &self.document.scheduled_tasks
    }

    /// Mutable access to scheduled tasks, for the scheduler's tick/cancel.
    pub fn scheduled_tasks_mut(&mut self) -> &mut Vec<ScheduledTask> {
        &mut self.document.scheduled_tasks
    }

    /// Remove every task in a COMPLETED or CANCELLED terminal state.
    /// FAILED tasks are retained until explicitly addressed by the user.
    ///
    /// Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn clean_completed_tasks(&mut self) -> Result<usize, StoreError> {
        let before = self.document.scheduled_tasks.len();
        self.document
            .scheduled_tasks
            .retain(|t| !matches!(t.status, TaskStatus::Completed | TaskStatus::Cancelled));
        let removed = before - self.document.scheduled_tasks.len();
        if removed > 0 {
            self.save()?;
            tracing::debug!(removed, "pruned completed/cancelled scheduled tasks");
        }
        Ok(removed)
    }

    /// Persist the document: write to a sibling temp file, flush, then
    /// rename over the target. The file is never partially rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the temp file
    /// cannot be written, or the rename fails.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut tmp = self.path.clone();
        let tmp_name = format!(
            ".{}.tmp",
            self.path.file_name().and_then(|s| s.to_str()).unwrap_or("pods")
        );
        tmp.set_file_name(tmp_name);

        let mut json = serde_json::to_vec_pretty(&self.document)?;
        json.push(b'\n');

        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }

        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

fn load_document(path: &Path) -> Result<StoreDocument, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreDocument::default()),
        Err(e) => return Err(StoreError::Io(e)),
    };

    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => return Ok(StoreDocument::default()),
    };

    Ok(migrate_value(value))
}

fn migrate_value(value: serde_json::Value) -> StoreDocument {
    let Some(obj) = value.as_object() else {
        return StoreDocument::default();
    };

    let is_modern = MODERN_MARKER_KEYS.iter().any(|k| obj.contains_key(*k));

    if is_modern {
        serde_json::from_value::<StoreDocument>(value).unwrap_or_default()
    } else {
        let mut aliases = BTreeMap::new();
        for (k, v) in obj {
            if let Some(s) = v.as_str() {
                aliases.insert(k.clone(), s.to_string());
            }
        }
        tracing::debug!(alias_count = aliases.len(), "migrating legacy flat alias document");
        StoreDocument {
            aliases,
            ..StoreDocument::default()
        }
    }
}

fn merge_legacy_schedule_file(document: &mut StoreDocument, schedule_path: &Path) {
    let Ok(bytes) = fs::read(schedule_path) else {
        return;
    };
    let Ok(map) = serde_json::from_slice::<BTreeMap<String, ScheduledTask>>(&bytes) else {
        return;
    };
    tracing::debug!(task_count = map.len(), "merged legacy schedule.json into store document");
    document.scheduled_tasks = map.into_values().collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus, when_epoch: i64) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            action: "stop".to_string(),
            alias: "foo".to_string(),
            when_epoch,
            status,
            created_at_epoch: 0,
            last_error: None,
        }
    }

    #[test]
    fn add_then_remove_alias_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        let mut store = Store::open(&path, dir.path().join("schedule.json")).expect("open");

        assert!(store.add_alias("foo", "p1", false).expect("add"));
        assert_eq!(store.get_all_aliases().get("foo"), Some(&"p1".to_string()));

        let removed = store.remove_alias("foo").expect("remove");
        assert_eq!(removed, Some("p1".to_string()));
        assert!(!store.get_all_aliases().contains_key("foo"));
    }

    #[test]
    fn add_alias_without_force_fails_soft() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        let mut store = Store::open(&path, dir.path().join("schedule.json")).expect("open");

        assert!(store.add_alias("foo", "p1", false).expect("add"));
        assert!(!store.add_alias("foo", "p2", false).expect("add again"));
        assert_eq!(store.get_all_aliases().get("foo"), Some(&"p1".to_string()));

        assert!(store.add_alias("foo", "p2", true).expect("force add"));
        assert_eq!(store.get_all_aliases().get("foo"), Some(&"p2".to_string()));
    }

    #[test]
    fn find_next_alias_index_picks_smallest_free() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        let mut store = Store::open(&path, dir.path().join("schedule.json")).expect("open");

        let template = PodTemplate {
            identifier: "h".to_string(),
            alias_template: "h-{i}".to_string(),
            gpu_spec: "h100".to_string(),
            storage_spec: "500GB".to_string(),
            container_disk_spec: None,
            image: None,
        };

        store.add_alias("h-1", "a", false).expect("add");
        store.add_alias("h-3", "c", false).expect("add");

        assert_eq!(store.find_next_alias_index(&template), 2);

        store.add_alias("h-2", "b", false).expect("add");
        assert_eq!(store.find_next_alias_index(&template), 4);
    }

    #[test]
    fn legacy_flat_map_migrates_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        fs::write(&path, r#"{"foo":"p1","bar":"p2"}"#).expect("write legacy");

        let store = Store::open(&path, dir.path().join("schedule.json")).expect("open");
        let aliases = store.get_all_aliases();
        assert_eq!(aliases.get("foo"), Some(&"p1".to_string()));
        assert_eq!(aliases.get("bar"), Some(&"p2".to_string()));
        assert!(store.list_templates().is_empty());
    }

    #[test]
    fn set_pod_config_promotes_single_alias_leaving_others_flat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        fs::write(&path, r#"{"foo":"p1","bar":"p2"}"#).expect("write legacy");

        let mut store = Store::open(&path, dir.path().join("schedule.json")).expect("open");
        assert!(store.set_pod_config("foo", "path", Some("/ws")).expect("set"));

        drop(store);
        let reread = Store::open(&path, dir.path().join("schedule.json")).expect("reopen");
        let aliases = reread.get_all_aliases();
        assert_eq!(aliases.get("foo"), Some(&"p1".to_string()));
        assert_eq!(aliases.get("bar"), Some(&"p2".to_string()));
        assert_eq!(
            reread.get_pod_config("foo").and_then(|c| c.path.clone()),
            Some("/ws".to_string())
        );
        assert!(reread.get_pod_config("bar").is_none());
    }

    #[test]
    fn missing_file_loads_as_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("does-not-exist.json");
        let store = Store::open(&path, dir.path().join("schedule.json")).expect("open");
        assert!(store.get_all_aliases().is_empty());
    }

    #[test]
    fn corrupt_file_loads_as_empty_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        fs::write(&path, "{ not json").expect("write corrupt");
        let store = Store::open(&path, dir.path().join("schedule.json")).expect("open");
        assert!(store.get_all_aliases().is_empty());
    }

    #[test]
    fn clean_completed_tasks_keeps_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        let mut store = Store::open(&path, dir.path().join("schedule.json")).expect("open");

        store.add_scheduled_task(task("t1", TaskStatus::Completed, 1)).expect("add");
        store.add_scheduled_task(task("t2", TaskStatus::Cancelled, 1)).expect("add");
        store.add_scheduled_task(task("t3", TaskStatus::Failed, 1)).expect("add");
        store.add_scheduled_task(task("t4", TaskStatus::Pending, 1)).expect("add");

        let removed = store.clean_completed_tasks().expect("clean");
        assert_eq!(removed, 2);

        let remaining: Vec<_> = store.scheduled_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(remaining, vec!["t3", "t4"]);
    }

    #[test]
    fn is_due_is_monotone_and_false_when_terminal() {
        let due_soon = task("t1", TaskStatus::Pending, 100);
        assert!(!due_soon.is_due(50));
        assert!(due_soon.is_due(100));
        assert!(due_soon.is_due(150));

        let completed = task("t2", TaskStatus::Completed, 0);
        assert!(!completed.is_due(i64::MAX));
    }
}
