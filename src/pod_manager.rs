//! Alias-aware pod lifecycle operations.
//!
//! Unique responsibility: the only component that both resolves aliases to
//! provider pod ids and mutates the Store. Parses the small GPU/storage
//! spec grammars used by `create`, and ships a handful of built-in templates
//! so a fresh install is useful without the user hand-authoring one first.
//!
//! Non-goals:
//! - SSH config reconciliation. Operations here return enough (`ip`,
//!   `port`) for a caller to reconcile the SSH file itself; this module
//!   never touches it, so the same lifecycle call is safe to use from both
//!   the command layer and the scheduler's tick without fighting over who
//!   owns the SSH write.
//! - Interactive confirmation. `destroy_pod` is unconditional; a
//!   confirmation prompt in front of it is the command layer's job.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::remote_client::{CreatePodRequest, PodRecord, PodStatus, RemoteClientError, RemotePodClient, extract_network_info};
use crate::store::{PodConfig, PodTemplate, Store, StoreError};

/// Default container image used when a create request and its template (if
/// any) both leave it unset.
const DEFAULT_IMAGE: &str = "runpod/pytorch:2.4.0-py3.11-cuda12.4.1-devel-ubuntu22.04";
/// Default storage spec shared by every built-in template.
const DEFAULT_TEMPLATE_STORAGE: &str = "100GB";
/// Default container disk size when a create request leaves it unset.
const DEFAULT_CONTAINER_DISK_GB: u32 = 20;
/// Default SSH-only port spec used for every created pod.
const DEFAULT_PORTS: &str = "22/tcp";

/// Timeout for `wait_for_pod_ready` after a fresh create.
const CREATE_READY_TIMEOUT: Duration = Duration::from_secs(600);
/// Timeout for `wait_for_pod_ready` after a start.
const START_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Observed view of a pod, as returned by every lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodView {
    /// The alias this view was resolved through.
    pub alias: String,
    /// Provider pod id. `"(dry-run)"` for a dry-run create.
    pub pod_id: String,
    /// Folded provider status.
    pub status: PodStatus,
    /// Public SSH IP, when known.
    pub ip: Option<String>,
    /// Public SSH port, when known.
    pub port: Option<u16>,
    /// Container image, when known.
    pub image: Option<String>,
    /// Whether this view came from a dry run (no provider contact).
    pub dry_run: bool,
}

/// Fields accepted by [`PodManager::create_pod`].
#[derive(Debug, Clone)]
pub struct CreatePodOptions {
    /// Alias to bind to the new pod.
    pub alias: String,
    /// GPU spec, e.g. `"2xA100"`.
    pub gpu_spec: String,
    /// Storage spec, e.g. `"500GB"`.
    pub storage_spec: String,
    /// Optional container disk spec; defaults to [`DEFAULT_CONTAINER_DISK_GB`].
    pub container_disk_spec: Option<String>,
    /// Optional container image; defaults to [`DEFAULT_IMAGE`].
    pub image: Option<String>,
    /// Overwrite an existing alias of the same name.
    pub force: bool,
    /// Validate and report without contacting the provider.
    pub dry_run: bool,
}

/// Errors from pod lifecycle operations.
#[derive(Debug)]
pub enum PodManagerError {
    /// Referenced alias does not exist. Carries every alias currently
    /// tracked, so the Command Layer can suggest candidates.
    AliasNotFound {
        /// The alias that was looked up.
        alias: String,
        /// Every alias currently tracked, sorted.
        available: Vec<String>,
    },
    /// `create`/`track` target alias already exists and `force` was not set.
    AliasExists(String),
    /// Referenced template does not exist. Carries every template
    /// identifier currently known (built-in and user-defined), so the
    /// Command Layer can suggest candidates.
    TemplateNotFound {
        /// The identifier that was looked up.
        identifier: String,
        /// Every known template identifier, sorted.
        available: Vec<String>,
    },
    /// `template create` target identifier already exists and `force` was
    /// not set.
    TemplateExists(String),
    /// A gpu/storage spec failed to parse.
    BadSpec(String),
    /// The provider call itself failed.
    Provider(String),
    /// A pod has no discoverable public SSH ip/port even after a refetch.
    NetworkInfoMissing(String),
    /// Store I/O failure.
    Io(StoreError),
}

impl fmt::Display for PodManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AliasNotFound { alias, available } => {
                if available.is_empty() {
                    write!(f, "no such alias: {alias} (no aliases are currently tracked)")
                } else {
                    write!(f, "no such alias: {alias} (known aliases: {})", available.join(", "))
                }
            }
            Self::AliasExists(a) => write!(f, "alias already exists: {a} (use --force to overwrite)"),
            Self::TemplateNotFound { identifier, available } => {
                if available.is_empty() {
                    write!(f, "no such template: {identifier} (no templates are currently known)")
                } else {
                    write!(f, "no such template: {identifier} (known templates: {})", available.join(", "))
                }
            }
            Self::TemplateExists(t) => write!(f, "template already exists: {t} (use --force to overwrite)"),
            Self::BadSpec(msg) => write!(f, "{msg}"),
            Self::Provider(msg) => write!(f, "provider error: {msg}"),
            Self::NetworkInfoMissing(a) => write!(f, "no public ssh endpoint for {a}"),
            Self::Io(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for PodManagerError {}

impl From<StoreError> for PodManagerError {
    fn from(value: StoreError) -> Self {
        Self::Io(value)
    }
}

fn gpu_spec_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(\d+)[xX](.+)$").unwrap()
}

/// Parse a GPU spec of the form `[<count>x]<model>`.
///
/// # Errors
///
/// Returns an error message naming the offending input if the spec is
/// empty, the count is zero or not a positive integer, or the model part is
/// empty.
pub fn parse_gpu_spec(raw: &str) -> Result<(u32, String), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("gpu spec is empty".to_string());
    }

    if let Some(caps) = gpu_spec_regex().captures(trimmed) {
        let count: u32 = caps[1]
            .parse()
            .map_err(|_| format!("invalid gpu spec '{raw}': count must be a positive integer"))?;
        if count == 0 {
            return Err(format!("invalid gpu spec '{raw}': count must be greater than zero"));
        }
        let model = caps[2].trim();
        if model.is_empty() {
            return Err(format!("invalid gpu spec '{raw}': model is empty"));
        }
        return Ok((count, model.to_uppercase()));
    }

    Ok((1, trimmed.to_uppercase()))
}

fn storage_spec_regex() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)^(\d+)\s*(GiB|GB|TB)$").unwrap()
}

/// Parse a storage spec: an integer followed by a case-insensitive `GB`,
/// `GiB`, or `TB` unit, rounded to the nearest whole gigabyte and rejected
/// below a 10GB floor.
///
/// # Errors
///
/// Returns an error message naming the offending input on an unparseable
/// spec, unrecognized unit, or a result below 10GB.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn parse_storage_spec(raw: &str) -> Result<u32, String> {
    let trimmed = raw.trim();

    let caps = storage_spec_regex()
        .captures(trimmed)
        .ok_or_else(|| format!("invalid storage spec '{raw}': expected an integer followed by GB, GiB, or TB"))?;

    let amount: f64 = caps[1]
        .parse()
        .map_err(|_| format!("invalid storage spec '{raw}': amount must be an integer"))?;

    let gb = match caps[2].to_uppercase().as_str() {
        "TB" => amount * 1000.0,
        "GIB" => amount * 1024.0 / 1000.0,
        _ => amount,
    };

    let rounded = gb.round() as u32;
    if rounded < 10 {
        return Err(format!("invalid storage spec '{raw}': must be at least 10GB"));
    }
    Ok(rounded)
}

/// Built-in templates, consulted only when a requested identifier is absent
/// from the user's own template set. Never persisted.
#[must_use]
pub fn default_templates() -> Vec<PodTemplate> {
    [("h100", "1xH100"), ("2h100", "2xH100"), ("5090", "1x5090"), ("a40", "1xA40")]
        .into_iter()
        .map(|(identifier, gpu_spec)| PodTemplate {
            identifier: identifier.to_string(),
            alias_template: format!("{identifier}-{{i}}"),
            gpu_spec: gpu_spec.to_string(),
            storage_spec: DEFAULT_TEMPLATE_STORAGE.to_string(),
            container_disk_spec: None,
            image: Some(DEFAULT_IMAGE.to_string()),
        })
        .collect()
}

/// Owns the Store and a provider client handle; the sole mutator of alias
/// and template state.
pub struct PodManager {
    store: Store,
    client: Arc<dyn RemotePodClient>,
}

impl PodManager {
    /// Bind a manager to an already-opened store and a provider client.
    #[must_use]
    pub fn new(store: Store, client: Arc<dyn RemotePodClient>) -> Self {
        Self { store, client }
    }

    /// Shared access to the underlying store, for callers (the scheduler)
    /// that need to read/write scheduled tasks in the same process run.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Mutable access to the underlying store.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    fn resolve_alias(&self, alias: &str) -> Result<String, PodManagerError> {
        self.store
            .get_pod_id(alias)
            .map(str::to_string)
            .ok_or_else(|| self.alias_not_found(alias))
    }

    fn alias_not_found(&self, alias: &str) -> PodManagerError {
        PodManagerError::AliasNotFound {
            alias: alias.to_string(),
            available: self.store.get_all_aliases().into_keys().collect(),
        }
    }

    fn resolve_template(&self, identifier: &str) -> Option<PodTemplate> {
        self.store
            .get_template(identifier)
            .cloned()
            .or_else(|| default_templates().into_iter().find(|t| t.identifier == identifier))
    }

    fn record_to_view(alias: &str, record: &PodRecord, dry_run: bool) -> PodView {
        let network = extract_network_info(record);
        PodView {
            alias: alias.to_string(),
            pod_id: record.id.clone(),
            status: record.status(),
            ip: network.as_ref().map(|(ip, _)| ip.clone()),
            port: network.as_ref().map(|(_, port)| *port),
            image: record.image.clone(),
            dry_run,
        }
    }

    /// Create a pod from individual specs.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasExists`] if the alias exists and
    /// `force` is false, [`PodManagerError::BadSpec`] if a spec fails to
    /// parse, or [`PodManagerError::Provider`]/[`PodManagerError::Io`] on
    /// downstream failure.
    pub async fn create_pod(&mut self, opts: CreatePodOptions) -> Result<PodView, PodManagerError> {
        if self.store.get_all_aliases().contains_key(&opts.alias) && !opts.force {
            return Err(PodManagerError::AliasExists(opts.alias));
        }

        let (gpu_count, gpu_model) = parse_gpu_spec(&opts.gpu_spec).map_err(PodManagerError::BadSpec)?;
        let volume_gb = parse_storage_spec(&opts.storage_spec).map_err(PodManagerError::BadSpec)?;
        let container_disk_gb = match &opts.container_disk_spec {
            Some(spec) => parse_storage_spec(spec).map_err(PodManagerError::BadSpec)?,
            None => DEFAULT_CONTAINER_DISK_GB,
        };
        let image = opts.image.clone().unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        if opts.dry_run {
            return Ok(PodView {
                alias: opts.alias,
                pod_id: "(dry-run)".to_string(),
                status: PodStatus::Invalid,
                ip: None,
                port: None,
                image: Some(image),
                dry_run: true,
            });
        }

        let gpu_type_id = self
            .client
            .find_gpu_type_id(&gpu_model)
            .await
            .map_err(|e: RemoteClientError| PodManagerError::Provider(e.to_string()))?;

        let pod_id = self
            .client
            .create_pod(CreatePodRequest {
                name: opts.alias.clone(),
                image,
                gpu_type_id,
                gpu_count,
                volume_gb,
                container_disk_gb,
                ports: vec![DEFAULT_PORTS.to_string()],
                start_ssh: true,
                public_ip: true,
            })
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?;

        self.store.add_alias(&opts.alias, &pod_id, true)?;
        tracing::info!(alias = %opts.alias, pod_id, "pod created, waiting for ready");

        let record = self
            .client
            .wait_for_pod_ready(&pod_id, CREATE_READY_TIMEOUT)
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?;

        Ok(Self::record_to_view(&opts.alias, &record, false))
    }

    /// Create a pod from a named template (user-defined, shadowing a
    /// built-in of the same identifier if present).
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::TemplateNotFound`] if no template (user or
    /// built-in) matches, or any error [`PodManager::create_pod`] can
    /// return.
    pub async fn create_pod_from_template(
        &mut self,
        template_id: &str,
        force: bool,
        dry_run: bool,
        alias_override: Option<&str>,
    ) -> Result<PodView, PodManagerError> {
        let template = self
            .resolve_template(template_id)
            .ok_or_else(|| self.template_not_found(template_id))?;

        let alias = if let Some(a) = alias_override {
            a.to_string()
        } else {
            if !template.has_index_token() {
                return Err(PodManagerError::BadSpec(format!(
                    "template '{template_id}' alias pattern has no {{i}} token"
                )));
            }
            let index = self.store.find_next_alias_index(&template);
            template.format_alias(index)
        };

        self.create_pod(CreatePodOptions {
            alias,
            gpu_spec: template.gpu_spec,
            storage_spec: template.storage_spec,
            container_disk_spec: template.container_disk_spec,
            image: template.image,
            force,
            dry_run,
        })
        .await
    }

    /// Start a stopped pod and wait for it to report ready.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`] or a provider error.
    pub async fn start_pod(&mut self, alias: &str) -> Result<PodView, PodManagerError> {
        let pod_id = self.resolve_alias(alias)?;
        self.client
            .start_pod(&pod_id)
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?;

        let record = self
            .client
            .wait_for_pod_ready(&pod_id, START_READY_TIMEOUT)
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?;

        tracing::info!(alias, pod_id, "pod started");
        Ok(Self::record_to_view(alias, &record, false))
    }

    /// Stop a running pod.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`] or a provider error.
    pub async fn stop_pod(&self, alias: &str) -> Result<(), PodManagerError> {
        let pod_id = self.resolve_alias(alias)?;
        self.client.stop_pod(&pod_id).await.map_err(|e| PodManagerError::Provider(e.to_string()))?;
        tracing::info!(alias, pod_id, "pod stopped");
        Ok(())
    }

    /// Terminate a pod and drop its alias. Stops it first on a best-effort
    /// basis if it was running; a stop failure does not block termination.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`], a provider error from the
    /// terminate call itself, or a store I/O error.
    pub async fn destroy_pod(&mut self, alias: &str) -> Result<String, PodManagerError> {
        let pod_id = self.resolve_alias(alias)?;

        if self.client.get_pod_status(&pod_id).await == PodStatus::Running
            && let Err(e) = self.client.stop_pod(&pod_id).await
        {
            tracing::warn!(alias, pod_id, error = %e, "best-effort stop before destroy failed, terminating anyway");
        }

        self.client
            .terminate_pod(&pod_id)
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?;

        self.store.remove_alias(alias)?;
        tracing::info!(alias, pod_id, "pod destroyed");
        Ok(pod_id)
    }

    /// Fetch the current view of a pod. Provider errors or an unrecognized
    /// provider id fold to an INVALID view rather than raising.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`] only.
    pub async fn get_pod(&self, alias: &str) -> Result<PodView, PodManagerError> {
        let pod_id = self.resolve_alias(alias)?;
        match self.client.get_pod(&pod_id).await {
            Ok(Some(record)) => Ok(Self::record_to_view(alias, &record, false)),
            Ok(None) => {
                tracing::warn!(alias, pod_id, "pod not found, folding to invalid");
                Ok(PodView {
                    alias: alias.to_string(),
                    pod_id,
                    status: PodStatus::Invalid,
                    ip: None,
                    port: None,
                    image: None,
                    dry_run: false,
                })
            }
            Err(e) => {
                tracing::warn!(alias, pod_id, error = %e, "provider lookup failed, folding to invalid");
                Ok(PodView {
                    alias: alias.to_string(),
                    pod_id,
                    status: PodStatus::Invalid,
                    ip: None,
                    port: None,
                    image: None,
                    dry_run: false,
                })
            }
        }
    }

    /// Views of every tracked alias, sorted by alias.
    pub async fn list_pods(&self) -> Vec<PodView> {
        let mut aliases: Vec<String> = self.store.get_all_aliases().into_keys().collect();
        aliases.sort();

        let mut views = Vec::with_capacity(aliases.len());
        for alias in aliases {
            if let Ok(view) = self.get_pod(&alias).await {
                views.push(view);
            }
        }
        views
    }

    /// Remove every alias whose provider status is INVALID.
    ///
    /// # Errors
    ///
    /// Returns a store I/O error.
    pub async fn clean_invalid_aliases(&mut self) -> Result<usize, PodManagerError> {
        let invalid: Vec<String> = self
            .list_pods()
            .await
            .into_iter()
            .filter(|v| v.status == PodStatus::Invalid)
            .map(|v| v.alias)
            .collect();

        let mut removed = 0usize;
        for alias in invalid {
            if self.store.remove_alias(&alias)?.is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "cleaned invalid aliases");
        }
        Ok(removed)
    }

    /// Resolve `(ip, port)` for an alias, refetching from the provider.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`],
    /// [`PodManagerError::NetworkInfoMissing`] if the pod still lacks a
    /// public SSH endpoint, or a provider error.
    pub async fn get_network_info(&self, alias: &str) -> Result<(String, u16), PodManagerError> {
        let pod_id = self.resolve_alias(alias)?;
        let record = self
            .client
            .get_pod(&pod_id)
            .await
            .map_err(|e| PodManagerError::Provider(e.to_string()))?
            .ok_or_else(|| self.alias_not_found(alias))?;

        extract_network_info(&record).ok_or_else(|| PodManagerError::NetworkInfoMissing(alias.to_string()))
    }

    /// Insert an alias pointing at an externally created pod.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasExists`] if the alias exists and
    /// `force` is false.
    pub fn track(&mut self, alias: &str, pod_id: &str, force: bool) -> Result<(), PodManagerError> {
        if self.store.add_alias(alias, pod_id, force)? {
            Ok(())
        } else {
            Err(PodManagerError::AliasExists(alias.to_string()))
        }
    }

    /// Delete an alias without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`] unless `missing_ok`.
    pub fn untrack(&mut self, alias: &str, missing_ok: bool) -> Result<(), PodManagerError> {
        let removed = self.store.remove_alias(alias)?;
        if removed.is_none() && !missing_ok {
            return Err(self.alias_not_found(alias));
        }
        Ok(())
    }

    /// Create (or overwrite) a template.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::TemplateExists`] if it exists and `force`
    /// is false.
    pub fn create_template(&mut self, template: PodTemplate, force: bool) -> Result<(), PodManagerError> {
        let identifier = template.identifier.clone();
        if self.store.add_template(template, force)? {
            Ok(())
        } else {
            Err(PodManagerError::TemplateExists(identifier))
        }
    }

    /// Delete a template.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::TemplateNotFound`] unless `missing_ok`.
    pub fn delete_template(&mut self, identifier: &str, missing_ok: bool) -> Result<(), PodManagerError> {
        let removed = self.store.remove_template(identifier)?;
        if removed.is_none() && !missing_ok {
            return Err(self.template_not_found(identifier));
        }
        Ok(())
    }

    /// List every template, user-defined and built-in, sorted by identifier.
    /// A user-defined template shadows a built-in of the same identifier.
    #[must_use]
    pub fn list_templates(&self) -> Vec<PodTemplate> {
        let mut templates: Vec<PodTemplate> = self.store.list_templates().into_iter().cloned().collect();
        for built_in in default_templates() {
            if !templates.iter().any(|t| t.identifier == built_in.identifier) {
                templates.push(built_in);
            }
        }
        templates.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        templates
    }

    fn template_not_found(&self, identifier: &str) -> PodManagerError {
        PodManagerError::TemplateNotFound {
            identifier: identifier.to_string(),
            available: self.list_templates().into_iter().map(|t| t.identifier).collect(),
        }
    }

    /// Set a per-alias config value.
    ///
    /// # Errors
    ///
    /// Returns [`PodManagerError::AliasNotFound`] if the alias is unknown.
    pub fn set_pod_config(&mut self, alias: &str, key: &str, value: Option<&str>) -> Result<(), PodManagerError> {
        if self.store.set_pod_config(alias, key, value)? {
            Ok(())
        } else {
            Err(self.alias_not_found(alias))
        }
    }

    /// Read a per-alias config value.
    #[must_use]
    pub fn get_pod_config(&self, alias: &str) -> Option<PodConfig> {
        self.store.get_pod_config(alias).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_client::fake::FakePodClient;

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
    fn parse_gpu_spec_boundaries() {
        assert_eq!(parse_gpu_spec("A100").unwrap(), (1, "A100".to_string()));
        assert_eq!(parse_gpu_spec("2xA100").unwrap(), (2, "A100".to_string()));
        assert_eq!(parse_gpu_spec("2XA100").unwrap(), (2, "A100".to_string()));
        assert!(parse_gpu_spec("0xA100").is_err());
        assert!(parse_gpu_spec("").is_err());
        assert!(parse_gpu_spec("   ").is_err());
        assert!(parse_gpu_spec("2x").is_err());
    }

    #[test]
    fn parse_storage_spec_boundaries() {
        assert_eq!(parse_storage_spec("10GB").unwrap(), 10);
        assert!(parse_storage_spec("9GB").is_err());
        assert_eq!(parse_storage_spec("1TB").unwrap(), 1000);
        assert_eq!(parse_storage_spec("1000GiB").unwrap(), 1024);
        assert!(parse_storage_spec("10MB").is_err());
        assert!(parse_storage_spec("ten GB").is_err());
    }

    #[tokio::test]
    async fn create_then_destroy_round_trips_alias_and_network_info() {
        let mut manager = manager_with(temp_store());

        let view = manager
            .create_pod(CreatePodOptions {
                alias: "foo".to_string(),
                gpu_spec: "1xH100".to_string(),
                storage_spec: "100GB".to_string(),
                container_disk_spec: None,
                image: None,
                force: false,
                dry_run: false,
            })
            .await
            .expect("create");

        assert_eq!(view.status, PodStatus::Running);
        assert!(view.ip.is_some());
        assert_eq!(manager.store().get_pod_id("foo"), Some(view.pod_id.as_str()));

        let pod_id = manager.destroy_pod("foo").await.expect("destroy");
        assert_eq!(pod_id, view.pod_id);
        assert!(manager.store().get_pod_id("foo").is_none());
    }

    #[tokio::test]
    async fn create_dry_run_does_not_touch_store() {
        let mut manager = manager_with(temp_store());

        let view = manager
            .create_pod(CreatePodOptions {
                alias: "foo".to_string(),
                gpu_spec: "1xH100".to_string(),
                storage_spec: "100GB".to_string(),
                container_disk_spec: None,
                image: None,
                force: false,
                dry_run: true,
            })
            .await
            .expect("dry run create");

        assert!(view.dry_run);
        assert!(manager.store().get_all_aliases().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_existing_alias_without_force() {
        let mut manager = manager_with(temp_store());
        manager.store_mut().add_alias("foo", "existing-pod", false).expect("seed");

        let err = manager
            .create_pod(CreatePodOptions {
                alias: "foo".to_string(),
                gpu_spec: "1xH100".to_string(),
                storage_spec: "100GB".to_string(),
                container_disk_spec: None,
                image: None,
                force: false,
                dry_run: false,
            })
            .await
            .expect_err("should reject");

        assert!(matches!(err, PodManagerError::AliasExists(a) if a == "foo"));
    }

    #[tokio::test]
    async fn template_indexing_skips_taken_slots() {
        let mut manager = manager_with(temp_store());
        let template = PodTemplate {
            identifier: "h".to_string(),
            alias_template: "h-{i}".to_string(),
            gpu_spec: "h100".to_string(),
            storage_spec: "500GB".to_string(),
            container_disk_spec: None,
            image: None,
        };
        manager.create_template(template, false).expect("create template");
        manager.store_mut().add_alias("h-1", "a", false).expect("seed h-1");
        manager.store_mut().add_alias("h-3", "c", false).expect("seed h-3");

        let view = manager
            .create_pod_from_template("h", false, true, None)
            .await
            .expect("dry run from template");
        assert_eq!(view.alias, "h-2");

        manager.store_mut().add_alias("h-2", "b", false).expect("seed h-2");
        let view = manager
            .create_pod_from_template("h", false, true, None)
            .await
            .expect("dry run from template again");
        assert_eq!(view.alias, "h-4");
    }

    #[tokio::test]
    async fn default_template_is_usable_when_not_shadowed() {
        let mut manager = manager_with(temp_store());
        let view = manager
            .create_pod_from_template("a40", false, true, Some("my-a40"))
            .await
            .expect("create from built-in template");
        assert_eq!(view.alias, "my-a40");
    }

    #[tokio::test]
    async fn clean_invalid_aliases_removes_only_invalid() {
        let mut manager = PodManager::new(temp_store(), Arc::new(FakePodClient::with_running_pod("present-pod")));
        manager.store_mut().add_alias("gone", "missing-pod", false).expect("seed");
        manager.store_mut().add_alias("present", "present-pod", false).expect("seed");

        let removed = manager.clean_invalid_aliases().await.expect("clean");
        assert_eq!(removed, 1);
        assert!(manager.store().get_pod_id("gone").is_none());
        assert!(manager.store().get_pod_id("present").is_some());
    }
}
