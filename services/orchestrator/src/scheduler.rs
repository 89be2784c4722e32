//! Cluster scheduler client: job records, allocations, and the HTTP
//! adapter.
//!
//! Job writes are conditional on the job's modify version, the scheduler's
//! CAS token. A submit that loses the race returns `false` and must be
//! abandoned, not retried; the next change notification re-drives the
//! attempt on whichever replica wins it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::watch::Chunk;

/// Response header carrying the allocation index for blocking reads.
pub const INDEX_HEADER: &str = "X-Sched-Index";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LONG_POLL_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler transport error: {0}")]
    Transport(String),

    #[error("unexpected scheduler status {status} for job {job}")]
    UnexpectedStatus { status: u16, job: String },
}

impl From<reqwest::Error> for SchedulerError {
    fn from(e: reqwest::Error) -> Self {
        SchedulerError::Transport(e.to_string())
    }
}

/// Client-side state of one allocation as the scheduler reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Pending,
    Running,
    Dead,
    Failed,
    Lost,
    /// Statuses this build does not know yet read as unknown instead of
    /// failing the whole response.
    #[serde(other)]
    Unknown,
}

/// One allocation of a job, as returned by the allocation long-poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Allocation {
    #[serde(rename = "ID", default)]
    pub id: String,
    pub client_status: ClientStatus,
    /// Version of the job this allocation belongs to. A redeploy bumps it,
    /// so the highest version is the authoritative allocation.
    #[serde(rename = "JobVersion")]
    pub version: u64,
    #[serde(default)]
    pub task_states: BTreeMap<String, TaskState>,
}

impl Allocation {
    /// Flattened `(task, message)` event history, in task order then event
    /// order. Logged when an allocation fails to come up.
    pub fn task_events(&self) -> Vec<(String, String)> {
        self.task_states
            .iter()
            .flat_map(|(task, state)| {
                state.events.iter().map(move |ev| (task.clone(), ev.display_message.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(default)]
    pub events: Vec<TaskEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskEvent {
    #[serde(default)]
    pub display_message: String,
}

/// A job descriptor as submitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub job_type: String,
    pub task_groups: Vec<TaskGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskGroup {
    pub name: String,
    pub count: u32,
    pub tasks: Vec<Task>,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    pub attempts: u32,
    pub interval_secs: u64,
    pub delay_secs: u64,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    pub name: String,
    pub driver: String,
    pub config: TaskConfig,
    pub services: Vec<ServiceSpec>,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskConfig {
    pub image: String,
}

/// A service registration a task carries into the discovery substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    pub name: String,
    pub port_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckSpec {
    #[serde(rename = "Type")]
    pub check_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resources {
    pub cpu_mhz: u32,
    pub memory_mb: u32,
    /// Labels the scheduler assigns dynamic host ports for.
    pub dynamic_ports: Vec<String>,
}

/// A job read together with its modify version, the CAS token for the
/// next submit. An unknown job reads as `job: None, version: 0`.
#[derive(Debug, Clone, Default)]
pub struct JobRecord {
    pub job: Option<Job>,
    pub version: u64,
}

/// The saga-facing scheduler surface. Deliberately has no delete: job
/// deletion belongs to the dispatcher's lost-request path alone, which
/// holds a [`JobDeleter`].
#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Read a job and its CAS token. Unknown jobs are not errors.
    async fn load_job(&self, name: &str) -> Result<JobRecord, SchedulerError>;

    /// Register `job` if its record is still at `version`. Returns whether
    /// the submit landed; `false` is a lost race, silently abandoned.
    async fn submit_job(&self, job: &Job, version: u64) -> Result<bool, SchedulerError>;

    /// Blocking read of a job's allocations past `index`. Transport and
    /// parse failures degrade to an empty chunk at the watch layer.
    async fn poll_allocations(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<Chunk<Allocation>, SchedulerError>;
}

/// The one delete capability. Held only by the code path that handles
/// requests vanishing from the authoritative set.
#[async_trait]
pub trait JobDeleter: Send + Sync {
    async fn delete_job(&self, name: &str, purge: bool) -> Result<(), SchedulerError>;
}

/// A job version captured in preparation for a conditional submit,
/// mirroring the store's `prepare_set`.
pub struct PreparedSubmit<'a> {
    scheduler: &'a dyn SchedulerApi,
    existing: JobRecord,
}

/// Capture `name`'s current version for a subsequent
/// [`PreparedSubmit::submit`].
pub async fn prepare_submit<'a>(
    scheduler: &'a dyn SchedulerApi,
    name: &str,
) -> Result<PreparedSubmit<'a>, SchedulerError> {
    let existing = scheduler.load_job(name).await?;
    Ok(PreparedSubmit { scheduler, existing })
}

impl<'a> PreparedSubmit<'a> {
    pub fn version(&self) -> u64 {
        self.existing.version
    }

    pub fn exists(&self) -> bool {
        self.existing.job.is_some()
    }

    /// Attempt the guarded submit. `Ok(false)` means another replica wrote
    /// the job first.
    pub async fn submit(&self, job: &Job) -> Result<bool, SchedulerError> {
        self.scheduler.submit_job(job, self.existing.version).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawJobResponse {
    job: Option<Job>,
    #[serde(default)]
    job_modify_index: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitBody<'a> {
    job: &'a Job,
    enforce_index: bool,
    job_modify_index: u64,
}

/// [`SchedulerApi`] and [`JobDeleter`] over the scheduler's HTTP API.
pub struct HttpScheduler {
    http: reqwest::Client,
    base_url: String,
}

impl HttpScheduler {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SchedulerError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpScheduler { http, base_url })
    }

    fn job_url(&self, name: &str) -> String {
        format!("{}/v1/job/{}", self.base_url, name)
    }
}

fn index_header(resp: &reqwest::Response) -> Option<u64> {
    resp.headers().get(INDEX_HEADER)?.to_str().ok()?.parse().ok()
}

#[async_trait]
impl SchedulerApi for HttpScheduler {
    async fn load_job(&self, name: &str) -> Result<JobRecord, SchedulerError> {
        let resp = self.http.get(self.job_url(name)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(JobRecord::default()),
            StatusCode::OK => {
                let raw: RawJobResponse = resp.json().await.map_err(|e| {
                    SchedulerError::Transport(format!("malformed job response: {e}"))
                })?;
                Ok(JobRecord { job: raw.job, version: raw.job_modify_index })
            }
            status => Err(SchedulerError::UnexpectedStatus {
                status: status.as_u16(),
                job: name.to_string(),
            }),
        }
    }

    async fn submit_job(&self, job: &Job, version: u64) -> Result<bool, SchedulerError> {
        let body = SubmitBody { job, enforce_index: true, job_modify_index: version };
        let resp = self.http.post(self.job_url(&job.name)).json(&body).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            // The enforced index no longer matched: lost the race.
            StatusCode::CONFLICT => Ok(false),
            status => Err(SchedulerError::UnexpectedStatus {
                status: status.as_u16(),
                job: job.name.clone(),
            }),
        }
    }

    async fn poll_allocations(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<Chunk<Allocation>, SchedulerError> {
        let wait_secs = wait.as_secs();
        let resp = self
            .http
            .get(format!("{}/allocations", self.job_url(name)))
            .query(&[("index", index.to_string()), ("wait", format!("{wait_secs}s"))])
            .timeout(wait + LONG_POLL_MARGIN)
            .send()
            .await?;
        let next = index_header(&resp).unwrap_or(index).max(index);
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Chunk::empty(next)),
            StatusCode::OK => match resp.json::<Vec<Allocation>>().await {
                Ok(items) => Ok(Chunk { items, index: next }),
                Err(e) => {
                    // A mangled body must not kill the watch loop.
                    debug!(job = %name, error = %e, "allocation body did not parse, reading as empty");
                    Ok(Chunk::empty(next))
                }
            },
            status => Err(SchedulerError::UnexpectedStatus {
                status: status.as_u16(),
                job: name.to_string(),
            }),
        }
    }
}

#[async_trait]
impl JobDeleter for HttpScheduler {
    async fn delete_job(&self, name: &str, purge: bool) -> Result<(), SchedulerError> {
        let resp = self
            .http
            .delete(self.job_url(name))
            .query(&[("purge", purge.to_string())])
            .send()
            .await?;
        match resp.status() {
            // Deleting a job the scheduler no longer knows is fine.
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(SchedulerError::UnexpectedStatus {
                status: status.as_u16(),
                job: name.to_string(),
            }),
        }
    }
}
