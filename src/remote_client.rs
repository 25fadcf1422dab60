//! Remote pod provider client.
//!
//! Unique responsibility: talk to the external GPU provider and translate
//! its wire shapes into the small vocabulary (`PodRecord`, `PodStatus`,
//! `PortInfo`) the rest of this crate reasons about. Nothing above this
//! module knows the provider speaks GraphQL for some operations and REST for
//! others.
//!
//! Non-goals:
//! - Alias awareness, Store mutation, SSH config (Pod Manager's job).
//! - Retrying a failed `create`/`start`/`stop`/`terminate` call beyond the
//!   transport-level retry already applied to transient HTTP failures;
//!   a provider-level rejection is surfaced to the caller verbatim.

#![forbid(unsafe_code)]

use std::env;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for the remote provider client.
#[derive(Clone, Debug)]
pub struct RemoteClientConfig {
    /// Provider API key.
    /// Env: `RUNPOD_API_KEY` (required)
    pub api_key: String,

    /// GraphQL endpoint, used for deploy/resume/query operations.
    /// Env: `RUNPOD_GRAPHQL_URL` (default: "<https://api.runpod.io/graphql>")
    pub graphql_url: String,

    /// REST endpoint, used for the start/stop/terminate/list path.
    /// Env: `RUNPOD_REST_URL` (default: "<https://rest.runpod.io/v1>")
    pub rest_url: String,

    /// HTTP request timeout in milliseconds.
    /// Env: `RUNPOD_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// Maximum number of retry attempts for transient failures.
    /// Env: `RUNPOD_HTTP_RETRY_MAX` (default: 3)
    pub retry_max: u32,

    /// Initial backoff between retries in milliseconds, doubled each
    /// attempt up to a 10s cap.
    /// Env: `RUNPOD_HTTP_RETRY_BACKOFF_MS` (default: 500)
    pub retry_backoff_ms: u64,

    /// Poll cadence while waiting for pod readiness, in milliseconds.
    /// Env: `RUNPOD_POLL_INTERVAL_MS` (default: 5000)
    pub poll_interval_ms: u64,
}

impl RemoteClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or an optional one
    /// fails to parse.
    pub fn from_env() -> Result<Self, RemoteClientError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            api_key: must_env("RUNPOD_API_KEY")?,
            graphql_url: env::var("RUNPOD_GRAPHQL_URL")
                .unwrap_or_else(|_| "https://api.runpod.io/graphql".to_string()),
            rest_url: env::var("RUNPOD_REST_URL").unwrap_or_else(|_| "https://rest.runpod.io/v1".to_string()),
            timeout_ms: parse_u64_env("RUNPOD_HTTP_TIMEOUT_MS", 30_000)?,
            retry_max: parse_u32_env("RUNPOD_HTTP_RETRY_MAX", 3)?,
            retry_backoff_ms: parse_u64_env("RUNPOD_HTTP_RETRY_BACKOFF_MS", 500)?,
            poll_interval_ms: parse_u64_env("RUNPOD_POLL_INTERVAL_MS", 5_000)?,
        })
    }
}

/// Observed status of a pod, folding provider ambiguity into three states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodStatus {
    /// Provider reports the pod is running.
    Running,
    /// Provider reports the pod is stopped (exited).
    Stopped,
    /// The pod could not be resolved: not found, or a provider error.
    Invalid,
}

/// A single runtime port mapping as reported by the provider.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Public IP for this mapping, if any.
    pub ip: Option<String>,
    /// Whether `ip` is routable from the public internet.
    pub is_ip_public: bool,
    /// Container-side port.
    pub private_port: u16,
    /// Provider-assigned public port.
    pub public_port: Option<u16>,
}

/// A pod record as observed from the provider.
#[derive(Debug, Clone)]
pub struct PodRecord {
    /// Provider pod id.
    pub id: String,
    /// Raw desired status string, e.g. "RUNNING", "EXITED".
    pub desired_status: Option<String>,
    /// Container image, when known.
    pub image: Option<String>,
    /// Runtime port mappings; empty/absent until the pod has started.
    pub ports: Vec<PortInfo>,
    /// Whether the provider reported a `runtime` block at all. A pod with
    /// no runtime yet is not ready regardless of desired status.
    pub has_runtime: bool,
}

impl PodRecord {
    /// Fold this record's desired status into the three-way [`PodStatus`].
    #[must_use]
    pub fn status(&self) -> PodStatus {
        match self.desired_status.as_deref() {
            Some("RUNNING") => PodStatus::Running,
            Some(_) => PodStatus::Stopped,
            None => PodStatus::Invalid,
        }
    }
}

/// Extract `(ip, public_port)` from the first runtime port entry reporting
/// `private_port == 22 && is_ip_public`.
///
/// This is a documented rule, not a heuristic: the provider may expose
/// several port mappings, but only a public IP bound to the SSH container
/// port is usable for `ssh_config` reconciliation.
#[must_use]
pub fn extract_network_info(record: &PodRecord) -> Option<(String, u16)> {
    record
        .ports
        .iter()
        .find(|p| p.private_port == 22 && p.is_ip_public)
        .and_then(|p| Some((p.ip.clone()?, p.public_port?)))
}

/// Fields needed to create a pod.
#[derive(Debug, Clone)]
pub struct CreatePodRequest {
    /// Pod display name.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Provider GPU type id, as resolved by `find_gpu_type_id`.
    pub gpu_type_id: String,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// Persistent volume size, GB.
    pub volume_gb: u32,
    /// Container disk size, GB.
    pub container_disk_gb: u32,
    /// Exposed ports, e.g. `["22/tcp", "8888/http"]`.
    pub ports: Vec<String>,
    /// Whether to start an SSH daemon in the container.
    pub start_ssh: bool,
    /// Whether to request a public IP.
    pub public_ip: bool,
}

/// Capability this crate depends on: create, observe, and transition pods
/// on a remote GPU provider.
///
/// The production implementation speaks a mix of GraphQL (deploy, resume,
/// stop, terminate, query) and REST (start/stop/terminate, list) against the
/// same account, matching how the provider's own API is split. Callers
/// never see that seam.
#[async_trait]
pub trait RemotePodClient: Send + Sync {
    /// Resolve a normalized GPU model key to a provider type id. When
    /// several provider types match the model, the one with the greatest
    /// VRAM wins.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider type matches, or on transport failure.
    async fn find_gpu_type_id(&self, model: &str) -> Result<String, RemoteClientError>;

    /// Create a pod. Returns the new provider pod id.
    ///
    /// # Errors
    ///
    /// Returns an error on provider rejection or transport failure.
    async fn create_pod(&self, request: CreatePodRequest) -> Result<String, RemoteClientError>;

    /// Fetch a pod record. `Ok(None)` means the provider does not recognize
    /// the id (it never existed, or was already terminated and reaped).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure distinct from not-found.
    async fn get_pod(&self, pod_id: &str) -> Result<Option<PodRecord>, RemoteClientError>;

    /// Folded status: never errors, provider/transport failures fold to
    /// [`PodStatus::Invalid`].
    async fn get_pod_status(&self, pod_id: &str) -> PodStatus;

    /// Start a stopped pod.
    ///
    /// # Errors
    ///
    /// Returns an error on provider rejection or transport failure.
    async fn start_pod(&self, pod_id: &str) -> Result<(), RemoteClientError>;

    /// Stop a running pod.
    ///
    /// # Errors
    ///
    /// Returns an error on provider rejection or transport failure.
    async fn stop_pod(&self, pod_id: &str) -> Result<(), RemoteClientError>;

    /// Terminate (permanently delete) a pod.
    ///
    /// # Errors
    ///
    /// Returns an error on provider rejection or transport failure.
    async fn terminate_pod(&self, pod_id: &str) -> Result<(), RemoteClientError>;

    /// Poll until the pod reports a runtime block and `RUNNING`, or
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteClientError::Timeout`] if the deadline passes, or a
    /// transport/provider error surfaced from an intermediate poll.
    async fn wait_for_pod_ready(&self, pod_id: &str, timeout: Duration) -> Result<PodRecord, RemoteClientError>;
}

/// Concrete client against the real provider API.
pub struct RunpodRemoteClient {
    cfg: RemoteClientConfig,
    http: reqwest::Client,
}

impl RunpodRemoteClient {
    /// Build a client from `cfg`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cfg: RemoteClientConfig) -> Result<Self, RemoteClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(RemoteClientError::Http)?;
        Ok(Self { cfg, http })
    }

    async fn graphql_execute<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<GraphQLResponse<T>, RemoteClientError> {
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(self.cfg.retry_backoff_ms);

        loop {
            attempt = attempt.saturating_add(1);
            let body = serde_json::json!({ "query": query, "variables": variables });

            let send_res = self
                .http
                .post(&self.cfg.graphql_url)
                .bearer_auth(&self.cfg.api_key)
                .json(&body)
                .send()
                .await;

            match send_res {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        let body_text = resp.text().await.unwrap_or_default();
                        if attempt <= self.cfg.retry_max && is_retryable_status(status) {
                            tracing::debug!(%status, attempt, backoff_ms = backoff.as_millis() as u64, "graphql call retrying");
                            tokio::time::sleep(backoff).await;
                            backoff = next_backoff(backoff);
                            continue;
                        }
                        tracing::error!(%status, body = %body_text, "graphql call failed");
                        return Err(RemoteClientError::Api {
                            status,
                            body: body_text,
                        });
                    }

                    let gql_resp: GraphQLResponse<T> =
                        resp.json().await.map_err(|e| RemoteClientError::Json(e.to_string()))?;

                    if let Some(errors) = &gql_resp.errors
                        && !errors.is_empty()
                    {
                        let msg = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");
                        return Err(RemoteClientError::GraphQL(msg));
                    }

                    return Ok(gql_resp);
                }
                Err(e) => {
                    if attempt <= self.cfg.retry_max && is_retryable_reqwest(&e) {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    return Err(RemoteClientError::Http(e));
                }
            }
        }
    }

    async fn rest_call(&self, method: reqwest::Method, path: &str) -> Result<(reqwest::StatusCode, String), RemoteClientError> {
        let url = format!("{}{path}", self.cfg.rest_url.trim_end_matches('/'));
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(self.cfg.retry_backoff_ms);

        loop {
            attempt = attempt.saturating_add(1);
            let send_res = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.cfg.api_key)
                .send()
                .await;

            match send_res {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !status.is_success() && attempt <= self.cfg.retry_max && is_retryable_status(status) {
                        tracing::debug!(%status, attempt, backoff_ms = backoff.as_millis() as u64, "rest call retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    return Ok((status, body));
                }
                Err(e) => {
                    if attempt <= self.cfg.retry_max && is_retryable_reqwest(&e) {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    return Err(RemoteClientError::Http(e));
                }
            }
        }
    }
}

#[async_trait]
impl RemotePodClient for RunpodRemoteClient {
    async fn find_gpu_type_id(&self, model: &str) -> Result<String, RemoteClientError> {
        let query = r"
            query gpuTypes {
                gpuTypes {
                    id
                    displayName
                    memoryInGb
                }
            }
        ";
        let resp: GraphQLResponse<GpuTypesData> = self.graphql_execute(query, serde_json::json!({})).await?;
        let types = resp.data.map(|d| d.gpu_types).unwrap_or_default();

        let normalized = model.trim().to_uppercase();
        types
            .into_iter()
            .filter(|t| {
                t.display_name
                    .as_deref()
                    .map(|n| n.to_uppercase().contains(&normalized))
                    .unwrap_or(false)
                    || t.id.to_uppercase().contains(&normalized)
            })
            .max_by_key(|t| t.memory_in_gb.unwrap_or(0))
            .map(|t| t.id)
            .ok_or_else(|| RemoteClientError::NotFound(format!("no gpu type matching '{model}'")))
    }

    async fn create_pod(&self, request: CreatePodRequest) -> Result<String, RemoteClientError> {
        let query = r"
            mutation podFindAndDeployOnDemand($input: PodFindAndDeployOnDemandInput!) {
                podFindAndDeployOnDemand(input: $input) {
                    id
                }
            }
        ";
        let input = DeployPodInput {
            cloud_type: "SECURE".to_string(),
            gpu_count: request.gpu_count,
            volume_in_gb: request.volume_gb,
            container_disk_in_gb: request.container_disk_gb,
            gpu_type_id: request.gpu_type_id,
            name: request.name,
            image_name: request.image,
            ports: Some(request.ports.join(",")),
            start_ssh: Some(request.start_ssh),
            public_ip: Some(request.public_ip),
        };
        let variables = serde_json::json!({ "input": input });
        let resp: GraphQLResponse<DeployData> = self.graphql_execute(query, variables).await?;

        resp.data
            .and_then(|d| d.pod_find_and_deploy_on_demand)
            .map(|p| p.id)
            .ok_or(RemoteClientError::EmptyResponse)
    }

    async fn get_pod(&self, pod_id: &str) -> Result<Option<PodRecord>, RemoteClientError> {
        let query = r"
            query pod($input: PodFilter!) {
                pod(input: $input) {
                    id
                    desiredStatus
                    imageName
                    runtime {
                        ports {
                            ip
                            isIpPublic
                            privatePort
                            publicPort
                        }
                    }
                }
            }
        ";
        let variables = serde_json::json!({ "input": { "podId": pod_id } });
        let resp: GraphQLResponse<PodQueryData> = self.graphql_execute(query, variables).await?;

        Ok(resp.data.and_then(|d| d.pod).map(wire_pod_to_record))
    }

    async fn get_pod_status(&self, pod_id: &str) -> PodStatus {
        match self.get_pod(pod_id).await {
            Ok(Some(record)) => record.status(),
            Ok(None) => {
                tracing::warn!(pod_id, "pod not found, folding to invalid");
                PodStatus::Invalid
            }
            Err(e) => {
                tracing::warn!(pod_id, error = %e, "pod status lookup failed, folding to invalid");
                PodStatus::Invalid
            }
        }
    }

    async fn start_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
        let (status, body) = self.rest_call(reqwest::Method::POST, &format!("/pods/{pod_id}/start")).await?;
        if status.is_success() {
            Ok(())
        } else {
            tracing::error!(pod_id, %status, "start_pod rest call failed");
            Err(RemoteClientError::Api { status, body })
        }
    }

    async fn stop_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
        let (status, body) = self.rest_call(reqwest::Method::POST, &format!("/pods/{pod_id}/stop")).await?;
        if status.is_success() {
            Ok(())
        } else {
            tracing::error!(pod_id, %status, "stop_pod rest call failed");
            Err(RemoteClientError::Api { status, body })
        }
    }

    async fn terminate_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
        let (status, body) = self.rest_call(reqwest::Method::DELETE, &format!("/pods/{pod_id}")).await?;
        if status.is_success() {
            Ok(())
        } else {
            tracing::error!(pod_id, %status, "terminate_pod rest call failed");
            Err(RemoteClientError::Api { status, body })
        }
    }

    async fn wait_for_pod_ready(&self, pod_id: &str, timeout: Duration) -> Result<PodRecord, RemoteClientError> {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(self.cfg.poll_interval_ms);

        loop {
            if start.elapsed() > timeout {
                tracing::error!(pod_id, timeout_secs = timeout.as_secs(), "timed out waiting for pod readiness");
                return Err(RemoteClientError::Timeout);
            }

            match self.get_pod(pod_id).await? {
                Some(record) if record.has_runtime && record.status() == PodStatus::Running => {
                    return Ok(record);
                }
                _ => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

fn wire_pod_to_record(wire: WirePodDetails) -> PodRecord {
    let ports = wire
        .runtime
        .and_then(|r| r.ports)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| {
            Some(PortInfo {
                ip: p.ip,
                is_ip_public: p.is_ip_public.unwrap_or(false),
                private_port: p.private_port?,
                public_port: p.public_port,
            })
        })
        .collect();

    PodRecord {
        id: wire.id,
        desired_status: wire.desired_status,
        image: wire.image_name,
        has_runtime: wire.runtime_present,
        ports,
    }
}

// Wire types, internal to the GraphQL transport.

#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployPodInput {
    cloud_type: String,
    gpu_count: u32,
    volume_in_gb: u32,
    container_disk_in_gb: u32,
    gpu_type_id: String,
    name: String,
    image_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ports: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_ssh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_ip: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeployData {
    #[serde(rename = "podFindAndDeployOnDemand")]
    pod_find_and_deploy_on_demand: Option<WirePodId>,
}

#[derive(Debug, Deserialize)]
struct WirePodId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PodQueryData {
    pod: Option<WirePodDetails>,
}

/// Custom-deserialized so `has_runtime` reflects whether the `runtime` key
/// was present at all, not just non-null content inside it.
#[derive(Debug)]
struct WirePodDetails {
    id: String,
    desired_status: Option<String>,
    image_name: Option<String>,
    runtime: Option<WireRuntime>,
    runtime_present: bool,
}

impl<'de> Deserialize<'de> for WirePodDetails {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            id: String,
            #[serde(rename = "desiredStatus")]
            desired_status: Option<String>,
            #[serde(rename = "imageName")]
            image_name: Option<String>,
            #[serde(default)]
            runtime: Option<WireRuntime>,
        }
        let value = serde_json::Value::deserialize(deserializer)?;
        let runtime_present = value.get("runtime").is_some_and(|v| !v.is_null());
        let raw: Raw = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
        Ok(Self {
            id: raw.id,
            desired_status: raw.desired_status,
            image_name: raw.image_name,
            runtime: raw.runtime,
            runtime_present,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireRuntime {
    ports: Option<Vec<WirePortMapping>>,
}

#[derive(Debug, Deserialize)]
struct WirePortMapping {
    ip: Option<String>,
    #[serde(rename = "isIpPublic")]
    is_ip_public: Option<bool>,
    #[serde(rename = "privatePort")]
    private_port: Option<u16>,
    #[serde(rename = "publicPort")]
    public_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct GpuTypesData {
    #[serde(rename = "gpuTypes")]
    gpu_types: Vec<WireGpuType>,
}

#[derive(Debug, Deserialize)]
struct WireGpuType {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "memoryInGb")]
    memory_in_gb: Option<u32>,
}

/// Errors from remote client operations.
#[derive(Debug)]
pub enum RemoteClientError {
    /// Missing required environment variable.
    MissingEnv(&'static str),
    /// Invalid environment variable value.
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The reason for invalidity.
        reason: &'static str,
    },
    /// HTTP transport failure.
    Http(reqwest::Error),
    /// Response body failed to parse.
    Json(String),
    /// GraphQL server-side error.
    GraphQL(String),
    /// Non-success HTTP response.
    Api {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body.
        body: String,
    },
    /// Server returned success with no usable data.
    EmptyResponse,
    /// No matching resource.
    NotFound(String),
    /// Deadline exceeded waiting for pod readiness.
    Timeout,
}

impl fmt::Display for RemoteClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(k) => write!(f, "missing required env var: {k}"),
            Self::InvalidEnv { key, reason } => write!(f, "invalid env var {key}: {reason}"),
            Self::Http(e) => write!(f, "http error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::GraphQL(e) => write!(f, "graphql error: {e}"),
            Self::Api { status, body } => write!(f, "api error: status={status}, body={body}"),
            Self::EmptyResponse => write!(f, "empty response from server"),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Timeout => write!(f, "timed out waiting for pod readiness"),
        }
    }
}

impl std::error::Error for RemoteClientError {}

fn must_env(key: &'static str) -> Result<String, RemoteClientError> {
    env::var(key).map_err(|_| RemoteClientError::MissingEnv(key))
}

fn parse_u32_env(key: &'static str, default: u32) -> Result<u32, RemoteClientError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u32>().map_err(|_| RemoteClientError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

fn parse_u64_env(key: &'static str, default: u64) -> Result<u64, RemoteClientError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u64>().map_err(|_| RemoteClientError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

#[inline]
const fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 409 | 425 | 429 | 500 | 502 | 503 | 504)
}

#[inline]
fn is_retryable_reqwest(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

#[inline]
fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(Duration::from_secs(10))
}

/// Hand-written fakes used in place of a generic HTTP mocking layer.
#[cfg(test)]
pub mod fake {
    use super::{CreatePodRequest, PodRecord, PodStatus, PortInfo, RemoteClientError, RemotePodClient};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory stand-in for [`RemotePodClient`]. Every pod created
    /// through it immediately reports `RUNNING` with a runtime unless
    /// configured otherwise via the public fields.
    pub struct FakePodClient {
        state: Mutex<HashMap<String, FakePod>>,
        next_id: Mutex<u64>,
        /// When set, every fallible call returns this error instead.
        pub fail_with: Option<String>,
    }

    #[derive(Clone)]
    struct FakePod {
        status: &'static str,
        has_runtime: bool,
        ports: Vec<PortInfo>,
    }

    impl Default for FakePodClient {
        fn default() -> Self {
            Self {
                state: Mutex::new(HashMap::new()),
                next_id: Mutex::new(1),
                fail_with: None,
            }
        }
    }

    impl FakePodClient {
        /// Build a fake with one pod pre-seeded, as if already created.
        #[must_use]
        pub fn with_running_pod(pod_id: &str) -> Self {
            let fake = Self::default();
            fake.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(
                pod_id.to_string(),
                FakePod {
                    status: "RUNNING",
                    has_runtime: true,
                    ports: vec![PortInfo {
                        ip: Some("203.0.113.10".to_string()),
                        is_ip_public: true,
                        private_port: 22,
                        public_port: Some(22001),
                    }],
                },
            );
            fake
        }

        fn err(&self) -> Option<RemoteClientError> {
            self.fail_with.clone().map(RemoteClientError::NotFound)
        }
    }

    #[async_trait]
    impl RemotePodClient for FakePodClient {
        async fn find_gpu_type_id(&self, model: &str) -> Result<String, RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            Ok(format!("type-{}", model.to_uppercase()))
        }

        async fn create_pod(&self, _request: CreatePodRequest) -> Result<String, RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            let mut next_id = self.next_id.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let id = format!("pod-{next_id}");
            *next_id += 1;
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(
                    id.clone(),
                    FakePod {
                        status: "RUNNING",
                        has_runtime: true,
                        ports: vec![PortInfo {
                            ip: Some("203.0.113.10".to_string()),
                            is_ip_public: true,
                            private_port: 22,
                            public_port: Some(22001),
                        }],
                    },
                );
            Ok(id)
        }

        async fn get_pod(&self, pod_id: &str) -> Result<Option<PodRecord>, RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            Ok(state.get(pod_id).map(|p| PodRecord {
                id: pod_id.to_string(),
                desired_status: Some(p.status.to_string()),
                image: None,
                has_runtime: p.has_runtime,
                ports: p.ports.clone(),
            }))
        }

        async fn get_pod_status(&self, pod_id: &str) -> PodStatus {
            match self.get_pod(pod_id).await {
                Ok(Some(record)) => record.status(),
                Ok(None) | Err(_) => PodStatus::Invalid,
            }
        }

        async fn start_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(pod) = state.get_mut(pod_id) {
                pod.status = "RUNNING";
                pod.has_runtime = true;
                Ok(())
            } else {
                Err(RemoteClientError::NotFound(pod_id.to_string()))
            }
        }

        async fn stop_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(pod) = state.get_mut(pod_id) {
                pod.status = "EXITED";
                Ok(())
            } else {
                Err(RemoteClientError::NotFound(pod_id.to_string()))
            }
        }

        async fn terminate_pod(&self, pod_id: &str) -> Result<(), RemoteClientError> {
            if let Some(e) = self.err() {
                return Err(e);
            }
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(pod_id);
            Ok(())
        }

        async fn wait_for_pod_ready(&self, pod_id: &str, _timeout: Duration) -> Result<PodRecord, RemoteClientError> {
            self.get_pod(pod_id)
                .await?
                .ok_or_else(|| RemoteClientError::NotFound(pod_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str, has_runtime: bool, ports: Vec<PortInfo>) -> PodRecord {
        PodRecord {
            id: "pod-1".to_string(),
            desired_status: Some(status.to_string()),
            image: None,
            has_runtime,
            ports,
        }
    }

    #[test]
    fn status_folds_running_and_other_and_missing() {
        assert_eq!(record("RUNNING", true, vec![]).status(), PodStatus::Running);
        assert_eq!(record("EXITED", true, vec![]).status(), PodStatus::Stopped);

        let invalid = PodRecord {
            id: "pod-1".to_string(),
            desired_status: None,
            image: None,
            has_runtime: false,
            ports: vec![],
        };
        assert_eq!(invalid.status(), PodStatus::Invalid);
    }

    #[test]
    fn extract_network_info_picks_first_public_ssh_port() {
        let ports = vec![
            PortInfo {
                ip: Some("10.0.0.1".to_string()),
                is_ip_public: false,
                private_port: 22,
                public_port: Some(1),
            },
            PortInfo {
                ip: Some("203.0.113.5".to_string()),
                is_ip_public: true,
                private_port: 8888,
                public_port: Some(2),
            },
            PortInfo {
                ip: Some("203.0.113.5".to_string()),
                is_ip_public: true,
                private_port: 22,
                public_port: Some(22001),
            },
        ];
        let rec = record("RUNNING", true, ports);
        assert_eq!(extract_network_info(&rec), Some(("203.0.113.5".to_string(), 22001)));
    }

    #[test]
    fn extract_network_info_none_when_no_public_ssh_port() {
        let ports = vec![PortInfo {
            ip: Some("10.0.0.1".to_string()),
            is_ip_public: false,
            private_port: 22,
            public_port: Some(1),
        }];
        let rec = record("RUNNING", true, ports);
        assert_eq!(extract_network_info(&rec), None);
    }

    #[tokio::test]
    async fn fake_client_create_then_get_round_trips() {
        let client = fake::FakePodClient::default();
        let id = client
            .create_pod(CreatePodRequest {
                name: "n".to_string(),
                image: "img".to_string(),
                gpu_type_id: "t".to_string(),
                gpu_count: 1,
                volume_gb: 20,
                container_disk_gb: 20,
                ports: vec!["22/tcp".to_string()],
                start_ssh: true,
                public_ip: true,
            })
            .await
            .expect("create");

        let record = client.get_pod(&id).await.expect("get").expect("present");
        assert_eq!(record.status(), PodStatus::Running);
        assert_eq!(extract_network_info(&record), Some(("203.0.113.10".to_string(), 22001)));
    }

    #[tokio::test]
    async fn fake_client_stop_then_status_reports_stopped() {
        let client = fake::FakePodClient::with_running_pod("pod-x");
        client.stop_pod("pod-x").await.expect("stop");
        assert_eq!(client.get_pod_status("pod-x").await, PodStatus::Stopped);
    }

    #[tokio::test]
    async fn fake_client_unknown_pod_status_is_invalid() {
        let client = fake::FakePodClient::default();
        assert_eq!(client.get_pod_status("missing").await, PodStatus::Invalid);
    }
}
