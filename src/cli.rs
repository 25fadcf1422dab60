//! Command layer: argument parsing, presentation, and post-action housekeeping.
//!
//! Unique responsibility: the only place that talks to the user. Maps each
//! subcommand onto a Pod Manager / Scheduler / SSH Config Editor call, prints
//! the result as a table or a line of text, and converts an error into a
//! process exit code. Every other module returns typed data; this one is
//! where that data becomes stdout.
//!
//! Non-goals:
//! - Deciding lifecycle or scheduling semantics itself; it only dispatches to
//!   [`crate::pod_manager`] and [`crate::scheduler`].
//! - Confirming destructive actions anywhere but here: `PodManager::destroy_pod`
//!   is unconditional, so the `--force` prompt lives in [`destroy`].

#![allow(clippy::print_stdout)]
#![allow(clippy::too_many_lines)]

use std::io::{self, Write as _};
use std::process::Command as ProcessCommand;
use std::sync::Arc;

use chrono::{Local, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use tabled::Tabled;
use tabled::settings::style::Style;

use crate::config;
use crate::pod_manager::{CreatePodOptions, PodManager, PodManagerError};
use crate::remote_client::{PodStatus, RemoteClientError, RemoteClientConfig, RunpodRemoteClient};
use crate::scheduler::{self, SchedulerError};
use crate::ssh_config::SshConfigEditor;
use crate::store::{PodTemplate, StoreError};

/// Top-level command-line interface.
#[derive(Debug, Parser)]
#[clap(name = "rp", about = "Host-side control plane for remote GPU pods", author)]
pub struct Opts {
    /// Subcommand to run.
    #[clap(subcommand)]
    pub command: Command,
}

/// Every subcommand this tool supports.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new pod, either from individual specs or a template.
    Create(CreateArgs),
    /// Start a stopped pod.
    Start {
        /// Alias of the pod to start.
        alias: String,
    },
    /// Stop a running pod, immediately or on a schedule.
    Stop(StopArgs),
    /// Terminate a pod and forget its alias.
    Destroy(DestroyArgs),
    /// Bind an alias to an externally created pod.
    Track(TrackArgs),
    /// Forget an alias without touching the provider.
    Untrack(UntrackArgs),
    /// List every tracked alias.
    List,
    /// Show a single alias in detail.
    Show {
        /// Alias to show.
        alias: String,
    },
    /// Reconcile stale state: invalid aliases, stale SSH blocks, terminal tasks.
    Clean,
    /// Scheduled-task CRUD.
    #[clap(subcommand)]
    Schedule(ScheduleCommand),
    /// Run one scheduler tick. Intended for the periodic agent, not humans.
    SchedulerTick,
    /// Reusable pod-creation template CRUD.
    #[clap(subcommand)]
    Template(TemplateCommand),
    /// Per-alias configuration.
    #[clap(subcommand)]
    Config(ConfigCommand),
    /// Open Cursor against the pod over SSH.
    Cursor {
        /// Alias to connect to.
        alias: String,
        /// Remote path to open; defaults to the configured path, then `/workspace`.
        path: Option<String>,
    },
    /// Open an interactive SSH shell to the pod.
    Shell {
        /// Alias to connect to.
        alias: String,
    },
}

/// Arguments for [`Command::Create`].
#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Alias to bind to the new pod; required unless `--template` supplies one.
    pub alias: Option<String>,
    /// GPU spec, e.g. `2xA100`. Mutually exclusive with `--template`.
    #[clap(long)]
    pub gpu: Option<String>,
    /// Storage spec, e.g. `500GB`. Mutually exclusive with `--template`.
    #[clap(long)]
    pub storage: Option<String>,
    /// Optional container disk spec.
    #[clap(long = "container-disk")]
    pub container_disk: Option<String>,
    /// Create from a named template instead of individual specs.
    #[clap(long)]
    pub template: Option<String>,
    /// Optional container image override.
    #[clap(long)]
    pub image: Option<String>,
    /// Overwrite an existing alias of the same name.
    #[clap(long)]
    pub force: bool,
    /// Validate and report without contacting the provider.
    #[clap(long = "dry-run")]
    pub dry_run: bool,
}

/// Arguments for [`Command::Stop`].
#[derive(Debug, Args)]
pub struct StopArgs {
    /// Alias of the pod to stop.
    pub alias: String,
    /// Schedule the stop for an absolute time instead of running it now.
    #[clap(long)]
    pub at: Option<String>,
    /// Schedule the stop after a relative duration instead of running it now.
    #[clap(long)]
    pub r#in: Option<String>,
    /// Validate the request (including any `--at`/`--in`) without acting.
    #[clap(long = "dry-run")]
    pub dry_run: bool,
}

/// Arguments for [`Command::Destroy`].
#[derive(Debug, Args)]
pub struct DestroyArgs {
    /// Alias of the pod to destroy.
    pub alias: String,
    /// Skip the confirmation prompt.
    #[clap(long)]
    pub force: bool,
}

/// Arguments for [`Command::Track`].
#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Alias to create.
    pub alias: String,
    /// Existing provider pod id to bind it to.
    pub pod_id: String,
    /// Overwrite an existing alias of the same name.
    #[clap(long)]
    pub force: bool,
}

/// Arguments for [`Command::Untrack`].
#[derive(Debug, Args)]
pub struct UntrackArgs {
    /// Alias to forget.
    pub alias: String,
    /// Do not error if the alias does not exist.
    #[clap(long = "missing-ok")]
    pub missing_ok: bool,
}

/// Scheduled-task subcommands.
#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// List every scheduled task.
    List,
    /// Cancel a pending task by id.
    Cancel {
        /// Task id, as shown by `schedule list`.
        id: String,
    },
}

/// Template subcommands.
#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// Define a new template.
    Create(TemplateCreateArgs),
    /// List every template, user-defined and built-in.
    List,
    /// Delete a template.
    Delete {
        /// Template identifier to delete.
        identifier: String,
        /// Do not error if the template does not exist.
        #[clap(long = "missing-ok")]
        missing_ok: bool,
    },
}

/// Arguments for [`TemplateCommand::Create`].
#[derive(Debug, Args)]
pub struct TemplateCreateArgs {
    /// Unique template identifier.
    pub identifier: String,
    /// Alias naming pattern; must contain the token `{i}`.
    pub alias_template: String,
    /// GPU spec, e.g. `2xA100`.
    pub gpu: String,
    /// Storage spec, e.g. `500GB`.
    pub storage: String,
    /// Optional container disk spec.
    #[clap(long = "container-disk")]
    pub container_disk: Option<String>,
    /// Optional container image.
    #[clap(long)]
    pub image: Option<String>,
    /// Overwrite an existing template of the same identifier.
    #[clap(long)]
    pub force: bool,
}

/// Per-alias configuration subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Set a configuration value.
    Set {
        /// Alias to configure.
        alias: String,
        /// Config key; currently only `path`.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Read a configuration value.
    Get {
        /// Alias to query.
        alias: String,
        /// Config key; currently only `path`.
        key: String,
    },
    /// List every configuration value set for an alias.
    List {
        /// Alias to query.
        alias: String,
    },
}

/// Valid per-alias configuration keys.
const VALID_CONFIG_KEYS: [&str; 1] = ["path"];

/// Everything that can go wrong at the command layer, already carrying an
/// exit-code-appropriate message.
#[derive(Debug)]
pub enum CliError {
    /// Pod Manager rejected the request.
    PodManager(PodManagerError),
    /// Scheduler rejected the request.
    Scheduler(SchedulerError),
    /// SSH config file could not be edited.
    SshConfig(crate::ssh_config::SshConfigError),
    /// Store could not be opened.
    Store(StoreError),
    /// Remote client could not be constructed (bad config, missing credential).
    ClientInit(String),
    /// `--at` and `--in` were both given.
    SchedulingConflict,
    /// `--template` and individual specs were both given, or neither was.
    SpecConflict(String),
    /// User declined a confirmation prompt.
    Aborted,
    /// An external helper (`cursor`, `ssh`) could not be launched.
    ExternalTool(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PodManager(e) => write!(f, "{e}"),
            Self::Scheduler(e) => write!(f, "{e}"),
            Self::SshConfig(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::ClientInit(msg) => write!(f, "could not initialize provider client: {msg}"),
            Self::SchedulingConflict => write!(f, "--at and --in are mutually exclusive"),
            Self::SpecConflict(msg) => write!(f, "{msg}"),
            Self::Aborted => write!(f, "aborted"),
            Self::ExternalTool(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<PodManagerError> for CliError {
    fn from(value: PodManagerError) -> Self {
        Self::PodManager(value)
    }
}

impl From<SchedulerError> for CliError {
    fn from(value: SchedulerError) -> Self {
        Self::Scheduler(value)
    }
}

impl From<crate::ssh_config::SshConfigError> for CliError {
    fn from(value: crate::ssh_config::SshConfigError) -> Self {
        Self::SshConfig(value)
    }
}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Build the `PodManager` this process will use for the duration of the
/// command, opening the Store and constructing the concrete remote client.
///
/// # Errors
///
/// Returns [`CliError::Store`] if the Store document cannot be read, or
/// [`CliError::ClientInit`] if provider configuration cannot be resolved.
fn build_manager() -> Result<PodManager, CliError> {
    config::ensure_config_dir_exists().map_err(|e| CliError::ClientInit(e.to_string()))?;

    let store = crate::store::Store::open(config::pod_config_file(), config::schedule_file())?;

    let api_key = config::resolve_api_key().map_err(|e| CliError::ClientInit(e.to_string()))?;
    let mut cfg = RemoteClientConfig::from_env().unwrap_or_else(|_| fallback_client_config(api_key.clone()));
    cfg.api_key = api_key;

    let client = RunpodRemoteClient::new(cfg).map_err(|e: RemoteClientError| CliError::ClientInit(e.to_string()))?;

    Ok(PodManager::new(store, Arc::new(client)))
}

/// Build a default client config when `RUNPOD_API_KEY` is not already in the
/// environment; `resolve_api_key` may have just sourced it from the
/// credential file or an interactive prompt instead.
fn fallback_client_config(api_key: String) -> RemoteClientConfig {
    RemoteClientConfig {
        api_key,
        graphql_url: "https://api.runpod.io/graphql".to_string(),
        rest_url: "https://rest.runpod.io/v1".to_string(),
        timeout_ms: 30_000,
        retry_max: 3,
        retry_backoff_ms: 500,
        poll_interval_ms: 5_000,
    }
}

/// Run silent post-mutation housekeeping: drop invalid aliases, prune stale
/// SSH blocks, clean terminal scheduled tasks. Every failure is logged and
/// swallowed; housekeeping never turns a successful command into a failed one.
async fn auto_clean(manager: &mut PodManager, ssh: &SshConfigEditor) {
    if let Err(e) = manager.clean_invalid_aliases().await {
        tracing::warn!(error = %e, "auto-clean: failed to drop invalid aliases");
    }

    let valid: Vec<String> = manager.store().get_all_aliases().into_keys().collect();
    if let Err(e) = ssh.prune(&valid) {
        tracing::warn!(error = %e, "auto-clean: failed to prune stale ssh blocks");
    }

    if let Err(e) = manager.store_mut().clean_completed_tasks() {
        tracing::warn!(error = %e, "auto-clean: failed to clean completed tasks");
    }
}

/// Entry point invoked by `main`. Dispatches `opts.command` and runs
/// post-mutation housekeeping for every command that can have changed state.
///
/// # Errors
///
/// Returns a [`CliError`] describing why the command failed; `main` converts
/// this into exit code 1.
pub async fn run(opts: Opts) -> Result<(), CliError> {
    match opts.command {
        Command::Create(args) => create(args).await,
        Command::Start { alias } => start(&alias).await,
        Command::Stop(args) => stop(args).await,
        Command::Destroy(args) => destroy(args).await,
        Command::Track(args) => track(args),
        Command::Untrack(args) => untrack(args),
        Command::List => list().await,
        Command::Show { alias } => show(&alias).await,
        Command::Clean => clean().await,
        Command::Schedule(cmd) => schedule(cmd),
        Command::SchedulerTick => scheduler_tick().await,
        Command::Template(cmd) => template(cmd),
        Command::Config(cmd) => config_cmd(cmd),
        Command::Cursor { alias, path } => cursor(&alias, path),
        Command::Shell { alias } => shell(&alias),
    }
}

async fn create(args: CreateArgs) -> Result<(), CliError> {
    let spec_given = args.gpu.is_some() || args.storage.is_some();
    if args.template.is_some() && spec_given {
        return Err(CliError::SpecConflict(
            "--template cannot be combined with --gpu/--storage".to_string(),
        ));
    }

    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());

    let view = if let Some(template_id) = &args.template {
        manager
            .create_pod_from_template(template_id, args.force, args.dry_run, args.alias.as_deref())
            .await?
    } else {
        let alias = args
            .alias
            .clone()
            .ok_or_else(|| CliError::SpecConflict("an alias is required without --template".to_string()))?;
        let gpu_spec = args
            .gpu
            .clone()
            .ok_or_else(|| CliError::SpecConflict("--gpu is required without --template".to_string()))?;
        let storage_spec = args
            .storage
            .clone()
            .ok_or_else(|| CliError::SpecConflict("--storage is required without --template".to_string()))?;

        manager
            .create_pod(CreatePodOptions {
                alias,
                gpu_spec,
                storage_spec,
                container_disk_spec: args.container_disk.clone(),
                image: args.image.clone(),
                force: args.force,
                dry_run: args.dry_run,
            })
            .await?
    };

    print_pod_view(&view);

    if !view.dry_run
        && let (Some(ip), Some(port)) = (view.ip.clone(), view.port)
    {
        ssh.upsert(&view.alias, &view.pod_id, &ip, port)?;
    }

    if !args.dry_run {
        run_setup_scripts(&view.alias);
        auto_clean(&mut manager, &ssh).await;
    }
    Ok(())
}

async fn start(alias: &str) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());

    let view = manager.start_pod(alias).await?;
    print_pod_view(&view);

    if let (Some(ip), Some(port)) = (view.ip.clone(), view.port) {
        ssh.upsert(alias, &view.pod_id, &ip, port)?;
    }

    run_setup_scripts(alias);
    auto_clean(&mut manager, &ssh).await;
    Ok(())
}

async fn stop(args: StopArgs) -> Result<(), CliError> {
    if args.at.is_some() && args.r#in.is_some() {
        return Err(CliError::SchedulingConflict);
    }

    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());

    if let Some(when) = args.at.as_deref().or(args.r#in.as_deref()) {
        let epoch = if args.at.is_some() {
            scheduler::parse_time_string(when, Local::now())?
        } else {
            Utc::now().timestamp() + scheduler::parse_duration_string(when)?
        };

        if args.dry_run {
            println!(
                "DRY RUN would schedule stop of '{}' at {}",
                args.alias,
                Utc.timestamp_opt(epoch, 0).single().map_or_else(|| "?".to_string(), |t| t.to_rfc3339())
            );
            return Ok(());
        }

        let task = scheduler::schedule_stop(&mut manager, &args.alias, epoch)?;
        println!("scheduled task {} to stop '{}' at {}", task.id, task.alias, format_epoch(task.when_epoch));

        if let Err(e) = scheduler::install_periodic_agent() {
            tracing::warn!(error = %e, "failed to install/refresh periodic scheduler agent");
        }

        auto_clean(&mut manager, &ssh).await;
        return Ok(());
    }

    if args.dry_run {
        println!("DRY RUN would stop '{}' now", args.alias);
        return Ok(());
    }

    manager.stop_pod(&args.alias).await?;
    println!("stopped '{}'", args.alias);
    auto_clean(&mut manager, &ssh).await;
    Ok(())
}

async fn destroy(args: DestroyArgs) -> Result<(), CliError> {
    if !args.force && !confirm(&format!("destroy '{}'? this cannot be undone [y/N] ", args.alias)) {
        return Err(CliError::Aborted);
    }

    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());

    let pod_id = manager.destroy_pod(&args.alias).await?;
    ssh.remove(&args.alias)?;
    println!("destroyed '{}' ({pod_id})", args.alias);

    auto_clean(&mut manager, &ssh).await;
    Ok(())
}

fn track(args: TrackArgs) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    manager.track(&args.alias, &args.pod_id, args.force)?;
    println!("tracking '{}' -> {}", args.alias, args.pod_id);
    Ok(())
}

fn untrack(args: UntrackArgs) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    manager.untrack(&args.alias, args.missing_ok)?;
    println!("untracked '{}'", args.alias);
    Ok(())
}

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
}

async fn list() -> Result<(), CliError> {
    let manager = build_manager()?;
    let views = manager.list_pods().await;

    let rows: Vec<PodRow> = views
        .into_iter()
        .map(|v| PodRow {
            alias: v.alias,
            id: v.pod_id,
            status: status_label(v.status).to_string(),
        })
        .collect();

    if rows.is_empty() {
        println!("no tracked pods");
    } else {
        println!("{}", tabled::Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

async fn show(alias: &str) -> Result<(), CliError> {
    let manager = build_manager()?;
    let view = manager.get_pod(alias).await?;

    println!("alias:  {}", view.alias);
    println!("id:     {}", view.pod_id);
    println!("status: {}", status_label(view.status));
    if let Some(image) = &view.image {
        println!("image:  {image}");
    }
    if let (Some(ip), Some(port)) = (&view.ip, view.port) {
        println!("ssh:    ssh {ip} -p {port}");
    }
    if let Some(cfg) = manager.get_pod_config(alias)
        && let Some(path) = cfg.path
    {
        println!("path:   {path}");
    }

    let pending: Vec<_> = scheduler::list_tasks(&manager).into_iter().filter(|t| t.alias == alias).collect();
    if !pending.is_empty() {
        println!("pending tasks:");
        for task in pending {
            println!("  {} {} at {} [{:?}]", task.id, task.action, format_epoch(task.when_epoch), task.status);
        }
    }
    Ok(())
}

async fn clean() -> Result<(), CliError> {
    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());

    let dropped = manager.clean_invalid_aliases().await?;
    let valid: Vec<String> = manager.store().get_all_aliases().into_keys().collect();
    let pruned = ssh.prune(&valid)?;
    let cleaned = manager.store_mut().clean_completed_tasks()?;

    println!("dropped {dropped} invalid alias(es), pruned {pruned} stale ssh block(s), cleaned {cleaned} task(s)");
    Ok(())
}

fn schedule(cmd: ScheduleCommand) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    match cmd {
        ScheduleCommand::List => {
            let tasks = scheduler::list_tasks(&manager);
            if tasks.is_empty() {
                println!("no scheduled tasks");
            } else {
                for t in tasks {
                    println!("{} {} {} at {} [{:?}]", t.id, t.action, t.alias, format_epoch(t.when_epoch), t.status);
                }
            }
        }
        ScheduleCommand::Cancel { id } => {
            let task = scheduler::cancel_task(&mut manager, &id)?;
            println!("cancelled task {}", task.id);
        }
    }
    Ok(())
}

async fn scheduler_tick() -> Result<(), CliError> {
    let mut manager = build_manager()?;
    let ssh = SshConfigEditor::new(config::ssh_config_file());
    let report = scheduler::tick(&mut manager, &ssh, Utc::now().timestamp()).await?;
    tracing::info!(completed = report.completed, failed = report.failed, "scheduler tick finished");
    Ok(())
}

fn template(cmd: TemplateCommand) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    match cmd {
        TemplateCommand::Create(args) => {
            let tpl = PodTemplate {
                identifier: args.identifier.clone(),
                alias_template: args.alias_template,
                gpu_spec: args.gpu,
                storage_spec: args.storage,
                container_disk_spec: args.container_disk,
                image: args.image,
            };
            manager.create_template(tpl, args.force)?;
            println!("created template '{}'", args.identifier);
        }
        TemplateCommand::List => {
            for t in manager.list_templates() {
                println!("{} gpu={} storage={} alias={}", t.identifier, t.gpu_spec, t.storage_spec, t.alias_template);
            }
        }
        TemplateCommand::Delete { identifier, missing_ok } => {
            manager.delete_template(&identifier, missing_ok)?;
            println!("deleted template '{identifier}'");
        }
    }
    Ok(())
}

fn config_cmd(cmd: ConfigCommand) -> Result<(), CliError> {
    let mut manager = build_manager()?;
    match cmd {
        ConfigCommand::Set { alias, key, value } => {
            validate_config_key(&key)?;
            manager.set_pod_config(&alias, &key, Some(&value))?;
            println!("set {key}={value} for '{alias}'");
        }
        ConfigCommand::Get { alias, key } => {
            validate_config_key(&key)?;
            let cfg = manager.get_pod_config(&alias).unwrap_or_default();
            if key == "path" {
                println!("{}", cfg.path.unwrap_or_default());
            }
        }
        ConfigCommand::List { alias } => {
            let cfg = manager.get_pod_config(&alias).unwrap_or_default();
            println!("path={}", cfg.path.unwrap_or_default());
        }
    }
    Ok(())
}

fn validate_config_key(key: &str) -> Result<(), CliError> {
    if VALID_CONFIG_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(CliError::SpecConflict(format!(
            "invalid config key '{key}'; valid keys: {}",
            VALID_CONFIG_KEYS.join(", ")
        )))
    }
}

fn cursor(alias: &str, path: Option<String>) -> Result<(), CliError> {
    let manager = build_manager()?;
    let _ = manager.store().get_pod_id(alias).ok_or_else(|| PodManagerError::AliasNotFound {
        alias: alias.to_string(),
        available: manager.store().get_all_aliases().into_keys().collect(),
    })?;

    let path = path
        .or_else(|| manager.get_pod_config(alias).and_then(|c| c.path))
        .unwrap_or_else(|| "/workspace".to_string());

    let remote_uri = format!("vscode-remote://ssh-remote+{alias}{path}");
    println!("opening cursor at '{alias}:{path}'...");

    let status = ProcessCommand::new("cursor")
        .arg("--folder-uri")
        .arg(&remote_uri)
        .status()
        .map_err(|e| CliError::ExternalTool(format!("cursor not found in PATH: {e}")))?;

    if status.success() {
        Ok(())
    } else {
        Err(CliError::ExternalTool(format!("cursor exited with {status}")))
    }
}

fn shell(alias: &str) -> Result<(), CliError> {
    let manager = build_manager()?;
    let _ = manager.store().get_pod_id(alias).ok_or_else(|| PodManagerError::AliasNotFound {
        alias: alias.to_string(),
        available: manager.store().get_all_aliases().into_keys().collect(),
    })?;

    let path = manager.get_pod_config(alias).and_then(|c| c.path);

    let status = if let Some(path) = &path {
        println!("connecting to '{alias}:{path}'...");
        ProcessCommand::new("ssh")
            .args(["-A", "-t", alias, &format!("cd {path} && exec bash -l")])
            .status()
    } else {
        println!("connecting to '{alias}'...");
        ProcessCommand::new("ssh").args(["-A", alias]).status()
    };

    status
        .map(|_| ())
        .map_err(|e| CliError::ExternalTool(format!("ssh not found in PATH: {e}")))
}

/// Run the optional local and remote setup scripts for `alias`, if present.
/// Neither script existing is the common case and is silent; a script that
/// exists but fails only warns, matching the non-fatal housekeeping policy
/// applied to every other post-action cleanup step.
fn run_setup_scripts(alias: &str) {
    let local = config::local_setup_script();
    if local.exists() {
        match ProcessCommand::new(&local).arg(alias).status() {
            Ok(status) if status.success() => tracing::debug!(alias, "local setup script completed"),
            Ok(status) => tracing::warn!(alias, %status, "local setup script exited non-zero"),
            Err(e) => tracing::warn!(alias, error = %e, "local setup script could not be launched"),
        }
    }

    let remote = config::remote_setup_script();
    if remote.exists() {
        match ProcessCommand::new("ssh").arg(alias).arg("bash").stdin(std::process::Stdio::piped()).spawn() {
            Ok(mut child) => {
                if let Some(mut stdin) = child.stdin.take()
                    && let Ok(script) = std::fs::read(&remote)
                    && stdin.write_all(&script).is_err()
                {
                    tracing::warn!(alias, "failed to stream remote setup script to ssh stdin");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(alias, error = %e, "remote setup script ssh session failed");
                }
            }
            Err(e) => tracing::warn!(alias, error = %e, "could not launch ssh for remote setup script"),
        }
    }
}

fn confirm(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_pod_view(view: &crate::pod_manager::PodView) {
    if view.dry_run {
        println!(
            "DRY RUN would create '{}': gpu/storage validated, image {}",
            view.alias,
            view.image.as_deref().unwrap_or("default")
        );
        return;
    }
    print!("'{}' -> {} [{}]", view.alias, view.pod_id, status_label(view.status));
    if let (Some(ip), Some(port)) = (&view.ip, view.port) {
        println!(" ssh {ip}:{port}");
    } else {
        println!();
    }
}

const fn status_label(status: PodStatus) -> &'static str {
    match status {
        PodStatus::Running => "running",
        PodStatus::Stopped => "stopped",
        PodStatus::Invalid => "invalid",
    }
}

fn format_epoch(epoch: i64) -> String {
    Local
        .timestamp_opt(epoch, 0)
        .single()
        .map_or_else(|| "?".to_string(), |t| t.format("%Y-%m-%d %H:%M %Z").to_string())
}
