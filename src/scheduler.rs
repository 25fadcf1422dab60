//! Deferred task scheduling: time/duration parsing, task lifecycle, tick.
//!
//! Unique responsibility: turn a human time/duration string into an absolute
//! UTC fire time, persist deferred stop actions against the Store the Pod
//! Manager already owns, and execute every due task on `tick`. There is no
//! in-process timer: the only driver is the external periodic agent
//! installed by [`install_periodic_agent`] (macOS launchd) or an explicit
//! `scheduler-tick` invocation.
//!
//! Non-goals:
//! - Retrying a FAILED task. It is terminal; see the Store's
//!   `clean_completed_tasks`, which deliberately leaves FAILED tasks in
//!   place.
//! - Owning the Store itself. Every operation here takes the [`PodManager`]
//!   that already holds it, so a single process run never has two competing
//!   handles to the same document.

use std::fmt;
use std::process::Command;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::config;
use crate::pod_manager::PodManager;
use crate::ssh_config::SshConfigEditor;
use crate::store::{ScheduledTask, StoreError, TaskStatus};

/// Errors from scheduler operations.
#[derive(Debug)]
pub enum SchedulerError {
    /// Alias named by `schedule_stop` is not currently tracked. Carries
    /// every alias currently tracked, so the Command Layer can suggest
    /// candidates.
    AliasNotFound {
        /// The alias that was looked up.
        alias: String,
        /// Every alias currently tracked, sorted.
        available: Vec<String>,
    },
    /// No task with the given id exists.
    TaskNotFound(String),
    /// A time string failed to parse.
    InvalidTime(String),
    /// A duration string failed to parse, or summed to zero.
    InvalidDuration(String),
    /// Both `--at` and `--in` were given to the same command.
    SchedulingConflict,
    /// Store I/O failure.
    Io(StoreError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AliasNotFound { alias, available } => {
                if available.is_empty() {
                    write!(f, "no such alias: {alias} (no aliases are currently tracked)")
                } else {
                    write!(f, "no such alias: {alias} (known aliases: {})", available.join(", "))
                }
            }
            Self::TaskNotFound(id) => write!(f, "no such scheduled task: {id}"),
            Self::InvalidTime(s) => write!(f, "invalid time '{s}'"),
            Self::InvalidDuration(s) => write!(f, "invalid duration '{s}'"),
            Self::SchedulingConflict => write!(f, "--at and --in are mutually exclusive"),
            Self::Io(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<StoreError> for SchedulerError {
    fn from(value: StoreError) -> Self {
        Self::Io(value)
    }
}

fn tomorrow_hhmm_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)^tomorrow\s+(\d{1,2}):(\d{2})$").unwrap()
}

fn hhmm_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap()
}

fn duration_segment_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)(\d+)\s*([dhms])").unwrap()
}

/// Parse an absolute time string into UTC unix seconds, resolving
/// timezone-naive results against the host's local timezone.
///
/// Tried in order: `tomorrow HH:MM`, bare `HH:MM` (today, rolling to
/// tomorrow if already past), `YYYY-MM-DD HH:MM` / `YYYY-MM-DDTHH:MM`, then
/// any other string a general date parser accepts.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidTime`] on empty input, an out-of-range
/// hour/minute, or a string no form above accepts.
pub fn parse_time_string(text: &str, now: DateTime<Local>) -> Result<i64, SchedulerError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::InvalidTime(text.to_string()));
    }

    if let Some(caps) = tomorrow_hhmm_regex().captures(trimmed) {
        let (hour, minute) = parse_hh_mm(&caps[1], &caps[2], text)?;
        let tomorrow = now.date_naive() + ChronoDuration::days(1);
        return local_to_epoch(tomorrow, hour, minute, text);
    }

    if let Some(caps) = hhmm_regex().captures(trimmed) {
        let (hour, minute) = parse_hh_mm(&caps[1], &caps[2], text)?;
        let today_epoch = local_to_epoch(now.date_naive(), hour, minute, text)?;
        return if today_epoch <= now.timestamp() {
            local_to_epoch(now.date_naive() + ChronoDuration::days(1), hour, minute, text)
        } else {
            Ok(today_epoch)
        };
    }

    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return naive_local_to_epoch(naive, text);
        }
    }

    dateparser::parse_with_timezone(trimmed, &Local)
        .map(|dt| dt.timestamp())
        .map_err(|_| SchedulerError::InvalidTime(text.to_string()))
}

fn parse_hh_mm(hour_str: &str, minute_str: &str, original: &str) -> Result<(u32, u32), SchedulerError> {
    let hour: u32 = hour_str.parse().map_err(|_| SchedulerError::InvalidTime(original.to_string()))?;
    let minute: u32 = minute_str.parse().map_err(|_| SchedulerError::InvalidTime(original.to_string()))?;
    if hour >= 24 || minute >= 60 {
        return Err(SchedulerError::InvalidTime(original.to_string()));
    }
    Ok((hour, minute))
}

fn local_to_epoch(date: chrono::NaiveDate, hour: u32, minute: u32, original: &str) -> Result<i64, SchedulerError> {
    let naive = date
        .and_hms_opt(hour, minute, 0)
        .ok_or_else(|| SchedulerError::InvalidTime(original.to_string()))?;
    naive_local_to_epoch(naive, original)
}

fn naive_local_to_epoch(naive: NaiveDateTime, original: &str) -> Result<i64, SchedulerError> {
    match Local.from_local_datetime(&naive).single() {
        Some(local) => Ok(local.with_timezone(&Utc).timestamp()),
        None => Err(SchedulerError::InvalidTime(original.to_string())),
    }
}

/// Parse a duration string, e.g. `"1d2h30m"`, into a strictly positive
/// number of seconds. Unit is one of `d`/`h`/`m`/`s`, case-insensitive.
///
/// # Errors
///
/// Returns [`SchedulerError::InvalidDuration`] on empty input or a sum that
/// is not strictly positive.
pub fn parse_duration_string(text: &str) -> Result<i64, SchedulerError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::InvalidDuration(text.to_string()));
    }

    let mut total: i64 = 0;
    for caps in duration_segment_regex().captures_iter(trimmed) {
        let value: i64 = caps[1].parse().map_err(|_| SchedulerError::InvalidDuration(text.to_string()))?;
        let seconds_per_unit = match caps[2].to_ascii_lowercase().as_str() {
            "d" => 86_400,
            "h" => 3_600,
            "m" => 60,
            "s" => 1,
            _ => return Err(SchedulerError::InvalidDuration(text.to_string())),
        };
        total = total.saturating_add(value.saturating_mul(seconds_per_unit));
    }

    if total <= 0 {
        return Err(SchedulerError::InvalidDuration(text.to_string()));
    }
    Ok(total)
}

/// Outcome of one [`tick`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Number of due tasks that completed successfully.
    pub completed: usize,
    /// Number of due tasks whose action failed.
    pub failed: usize,
}

impl TickReport {
    /// Whether any task was processed at all.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.completed == 0 && self.failed == 0
    }
}

/// Enqueue a `stop` task for `alias` at `when_epoch` (UTC unix seconds).
///
/// # Errors
///
/// Returns [`SchedulerError::AliasNotFound`] if `alias` is not currently
/// tracked, or a store I/O error.
pub fn schedule_stop(manager: &mut PodManager, alias: &str, when_epoch: i64) -> Result<ScheduledTask, SchedulerError> {
    let tracked = manager.store().get_all_aliases();
    if !tracked.contains_key(alias) {
        return Err(SchedulerError::AliasNotFound {
            alias: alias.to_string(),
            available: tracked.into_keys().collect(),
        });
    }

    let task = ScheduledTask {
        id: Uuid::new_v4().to_string(),
        action: "stop".to_string(),
        alias: alias.to_string(),
        when_epoch,
        status: TaskStatus::Pending,
        created_at_epoch: Utc::now().timestamp(),
        last_error: None,
    };
    manager.store_mut().add_scheduled_task(task.clone())?;
    Ok(task)
}

/// List every scheduled task.
#[must_use]
pub fn list_tasks(manager: &PodManager) -> Vec<ScheduledTask> {
    manager.store().scheduled_tasks().to_vec()
}

/// Cancel a PENDING task. A call on an already-terminal task is a no-op that
/// returns the task unchanged.
///
/// # Errors
///
/// Returns [`SchedulerError::TaskNotFound`] if no task has this id, or a
/// store I/O error.
pub fn cancel_task(manager: &mut PodManager, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
    let was_pending = {
        let tasks = manager.store_mut().scheduled_tasks_mut();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
        let was_pending = matches!(task.status, TaskStatus::Pending);
        if was_pending {
            task.status = TaskStatus::Cancelled;
        }
        was_pending
    };

    if was_pending {
        manager.store().save()?;
    }

    manager
        .store()
        .scheduled_tasks()
        .iter()
        .find(|t| t.id == task_id)
        .cloned()
        .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
}

/// Execute every task that is due as of `now_epoch`: stop the pod, remove
/// its SSH managed block, and mark the task COMPLETED; on any failure in
/// that sequence the task is marked FAILED with the error recorded.
///
/// Non-atomic and idempotent per task: a task leaves PENDING at most once,
/// so running `tick` twice at the same instant is a no-op the second time.
///
/// # Errors
///
/// Returns a store I/O error. Individual task failures are recorded on the
/// task itself, not propagated.
pub async fn tick(manager: &mut PodManager, ssh: &SshConfigEditor, now_epoch: i64) -> Result<TickReport, SchedulerError> {
    let due: Vec<(String, String)> = manager
        .store()
        .scheduled_tasks()
        .iter()
        .filter(|t| t.is_due(now_epoch))
        .map(|t| (t.id.clone(), t.alias.clone()))
        .collect();

    let mut report = TickReport::default();

    for (task_id, alias) in due {
        let outcome = run_stop_action(manager, ssh, &alias).await;

        let tasks = manager.store_mut().scheduled_tasks_mut();
        if let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) {
            match outcome {
                Ok(()) => {
                    task.status = TaskStatus::Completed;
                    report.completed += 1;
                    tracing::info!(task_id = %task.id, alias = %task.alias, "scheduled stop completed");
                }
                Err(msg) => {
                    task.status = TaskStatus::Failed;
                    tracing::error!(task_id = %task.id, alias = %task.alias, error = %msg, "scheduled stop failed");
                    task.last_error = Some(msg);
                    report.failed += 1;
                }
            }
        }
        manager.store().save()?;
    }

    Ok(report)
}

async fn run_stop_action(manager: &PodManager, ssh: &SshConfigEditor, alias: &str) -> Result<(), String> {
    manager.stop_pod(alias).await.map_err(|e| e.to_string())?;
    ssh.remove(alias).map_err(|e| e.to_string())?;
    Ok(())
}

/// Install (or update) a per-user periodic agent that invokes
/// `scheduler-tick` every 60 seconds. A no-op on hosts without such a
/// facility. Idempotent: the agent definition is rewritten only when its
/// content would actually change, then (re)bootstrapped and kick-started.
///
/// # Errors
///
/// Returns an I/O error if the agent definition cannot be written.
#[cfg(target_os = "macos")]
pub fn install_periodic_agent() -> std::io::Result<()> {
    let Ok(exe) = std::env::current_exe() else {
        return Ok(());
    };

    std::fs::create_dir_all(config::launch_agents_dir())?;
    std::fs::create_dir_all(config::logs_dir())?;

    let mut env_vars = vec![("PATH".to_string(), "/opt/homebrew/bin:/usr/local/bin:/usr/bin:/bin".to_string())];
    if std::env::var("RUNPOD_API_KEY").is_err()
        && let Ok(key) = std::fs::read_to_string(config::api_key_file())
        && !key.trim().is_empty()
    {
        env_vars.push(("RUNPOD_API_KEY".to_string(), key.trim().to_string()));
    }

    let plist_path = config::launchd_plist_path();
    let rendered = render_plist(&exe.to_string_lossy(), &config::scheduler_log_file().to_string_lossy(), &env_vars);

    let need_write = std::fs::read_to_string(&plist_path).map(|existing| existing != rendered).unwrap_or(true);

    if need_write {
        std::fs::write(&plist_path, &rendered)?;
    }

    let label_path = format!("gui/{}/{}", unsafe_uid(), config::LAUNCHD_LABEL);
    let already_loaded = Command::new("launchctl")
        .args(["print", &label_path])
        .output()
        .is_ok_and(|o| o.status.success());

    if need_write && already_loaded {
        let _ = Command::new("launchctl").args(["bootout", &label_path]).output();
        let _ = Command::new("launchctl")
            .args(["bootstrap", &format!("gui/{}", unsafe_uid()), &plist_path.to_string_lossy()])
            .output();
    } else if !already_loaded {
        let _ = Command::new("launchctl")
            .args(["bootstrap", &format!("gui/{}", unsafe_uid()), &plist_path.to_string_lossy()])
            .output();
    }

    let _ = Command::new("launchctl").args(["kickstart", "-k", &label_path]).output();

    Ok(())
}

/// No-op periodic agent installer on hosts without a user-level persistent
/// agent facility; tasks fire only when `scheduler-tick` is invoked
/// externally (e.g. cron, or by hand).
#[cfg(not(target_os = "macos"))]
pub fn install_periodic_agent() -> std::io::Result<()> {
    Ok(())
}

#[cfg(target_os = "macos")]
fn unsafe_uid() -> u32 {
    // SAFETY: getuid takes no arguments and cannot fail.
    #[allow(unsafe_code)]
    unsafe {
        libc::getuid()
    }
}

#[cfg(target_os = "macos")]
fn render_plist(program: &str, log_path: &str, env_vars: &[(String, String)]) -> String {
    let mut env_entries = String::new();
    for (k, v) in env_vars {
        env_entries.push_str(&format!("\t\t<key>{k}</key>\n\t\t<string>{v}</string>\n"));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
<plist version=\"1.0\">\n\
<dict>\n\
\t<key>Label</key>\n\
\t<string>{label}</string>\n\
\t<key>ProgramArguments</key>\n\
\t<array>\n\
\t\t<string>{program}</string>\n\
\t\t<string>scheduler-tick</string>\n\
\t</array>\n\
\t<key>StartInterval</key>\n\
\t<integer>60</integer>\n\
\t<key>RunAtLoad</key>\n\
\t<true/>\n\
\t<key>StandardOutPath</key>\n\
\t<string>{log_path}</string>\n\
\t<key>StandardErrorPath</key>\n\
\t<string>{log_path}</string>\n\
\t<key>EnvironmentVariables</key>\n\
\t<dict>\n\
{env_entries}\t</dict>\n\
</dict>\n\
</plist>\n",
        label = config::LAUNCHD_LABEL,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_client::fake::FakePodClient;
    use crate::store::Store;
    use std::sync::Arc;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        #[allow(clippy::unwrap_used)]
        Local
            .from_local_datetime(&chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
            .single()
            .unwrap()
    }

    fn manager_with(store: Store) -> PodManager {
        PodManager::new(store, Arc::new(FakePodClient::default()))
    }

    fn temp_store() -> Store {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pods.json");
        let schedule = dir.path().join("schedule.json");
        std::mem::forget(dir);
        Store::open(path, schedule).expect("open")
    }

    #[test]
    fn hhmm_rolls_to_tomorrow_when_past() {
        let now = local(2026, 7, 28, 14, 30);
        let epoch = parse_time_string("14:30", now).expect("parse");
        let tomorrow_same_time = now + ChronoDuration::days(1);
        assert_eq!(epoch, tomorrow_same_time.with_timezone(&Utc).timestamp());
    }

    #[test]
    fn hhmm_stays_today_when_future() {
        let now = local(2026, 7, 28, 8, 0);
        let epoch = parse_time_string("14:30", now).expect("parse");
        let expected = local(2026, 7, 28, 14, 30).with_timezone(&Utc).timestamp();
        assert_eq!(epoch, expected);
    }

    #[test]
    fn tomorrow_hhmm_is_always_next_day() {
        let now = local(2026, 7, 28, 23, 0);
        let epoch = parse_time_string("tomorrow 01:00", now).expect("parse");
        let expected = local(2026, 7, 29, 1, 0).with_timezone(&Utc).timestamp();
        assert_eq!(epoch, expected);
    }

    #[test]
    fn explicit_date_formats_parse() {
        let now = local(2026, 7, 28, 8, 0);
        let a = parse_time_string("2026-08-01 09:00", now).expect("space form");
        let b = parse_time_string("2026-08-01T09:00", now).expect("t form");
        assert_eq!(a, b);
    }

    #[test]
    fn impossible_and_empty_times_are_rejected() {
        let now = local(2026, 7, 28, 8, 0);
        assert!(parse_time_string("25:99", now).is_err());
        assert!(parse_time_string("", now).is_err());
        assert!(parse_time_string("   ", now).is_err());
    }

    #[test]
    fn duration_boundaries() {
        assert!(parse_duration_string("0m").is_err());
        assert_eq!(parse_duration_string("0h0m1s").expect("parse"), 1);
        assert_eq!(parse_duration_string("1d2h30m").expect("parse"), 86_400 + 2 * 3_600 + 30 * 60);
    }

    #[test]
    fn cancel_is_noop_on_terminal_task() {
        let mut manager = manager_with(temp_store());
        manager.store_mut().add_alias("foo", "pod-1", false).expect("seed");
        let task = schedule_stop(&mut manager, "foo", 1_000).expect("schedule");

        let cancelled = cancel_task(&mut manager, &task.id).expect("cancel");
        assert_eq!(cancelled.status, TaskStatus::Cancelled);

        let again = cancel_task(&mut manager, &task.id).expect("cancel again");
        assert_eq!(again.status, TaskStatus::Cancelled);
    }

    #[test]
    fn schedule_stop_rejects_unknown_alias() {
        let mut manager = manager_with(temp_store());
        let err = schedule_stop(&mut manager, "ghost", 1_000).expect_err("should fail");
        assert!(matches!(err, SchedulerError::AliasNotFound { alias, .. } if alias == "ghost"));
    }

    #[tokio::test]
    async fn tick_completes_due_stop_and_removes_ssh_block() {
        let mut manager = PodManager::new(temp_store(), Arc::new(FakePodClient::with_running_pod("pod-1")));
        manager.store_mut().add_alias("x", "pod-1", false).expect("seed");

        let dir = tempfile::tempdir().expect("tempdir");
        let ssh_path = dir.path().join("config");
        let ssh = SshConfigEditor::new(&ssh_path);
        ssh.upsert("x", "pod-1", "1.2.3.4", 22001).expect("seed ssh block");

        let task = schedule_stop(&mut manager, "x", 100).expect("schedule");

        let report = tick(&mut manager, &ssh, 50).await.expect("tick before due");
        assert!(report.is_empty());
        assert_eq!(
            manager.store().scheduled_tasks().iter().find(|t| t.id == task.id).map(|t| t.status),
            Some(TaskStatus::Pending)
        );

        let report = tick(&mut manager, &ssh, 150).await.expect("tick after due");
        assert_eq!(report.completed, 1);
        assert_eq!(
            manager.store().scheduled_tasks().iter().find(|t| t.id == task.id).map(|t| t.status),
            Some(TaskStatus::Completed)
        );
        assert!(!std::fs::read_to_string(&ssh_path).expect("read").contains("Host x"));

        let report = tick(&mut manager, &ssh, 200).await.expect("tick again is idempotent");
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn tick_marks_failed_task_with_error_and_does_not_retry() {
        let mut client = FakePodClient::default();
        client.fail_with = Some("boom".to_string());
        let mut manager = PodManager::new(temp_store(), Arc::new(client));
        manager.store_mut().add_alias("x", "pod-1", false).expect("seed");

        let dir = tempfile::tempdir().expect("tempdir");
        let ssh = SshConfigEditor::new(dir.path().join("config"));

        let task = schedule_stop(&mut manager, "x", 100).expect("schedule");
        let report = tick(&mut manager, &ssh, 150).await.expect("tick");
        assert_eq!(report.failed, 1);

        let stored = manager.store().scheduled_tasks().iter().find(|t| t.id == task.id).cloned().expect("task");
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.last_error.is_some());

        let report = tick(&mut manager, &ssh, 200).await.expect("tick again");
        assert!(report.is_empty());
    }
}
