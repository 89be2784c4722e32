//! Scripted collaborator fakes for saga and dispatcher tests.
//!
//! Poll answers that would let a loop spin (health checks, the catalog,
//! non-terminal allocations) hold the "connection" for a simulated second
//! before responding, the way a real long poll would; under paused test
//! time that lets watch deadlines advance instead of spinning.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::discovery::{CheckStatus, DiscoveryApi, DiscoveryError, HealthCheck};
use crate::resolver::{AddressResolver, ResolveError, ServiceAddress};
use crate::scheduler::{
    Allocation, ClientStatus, Job, JobDeleter, JobRecord, SchedulerApi, SchedulerError,
};
use crate::watch::Chunk;

const HOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
enum AllocationScript {
    /// `pending` for this many polls, `running` afterwards.
    RunningAfter(u64),
    NeverRunning,
}

struct SchedulerState {
    reject_submit: bool,
    script: AllocationScript,
    polls: u64,
    submitted: Vec<Job>,
    deleted: Vec<String>,
}

/// Scripted [`SchedulerApi`] + [`JobDeleter`].
pub struct ScriptedScheduler {
    state: Mutex<SchedulerState>,
}

impl ScriptedScheduler {
    fn with_script(reject_submit: bool, script: AllocationScript) -> Self {
        ScriptedScheduler {
            state: Mutex::new(SchedulerState {
                reject_submit,
                script,
                polls: 0,
                submitted: Vec::new(),
                deleted: Vec::new(),
            }),
        }
    }

    /// Allocation turns `running` after `polls` pending answers.
    pub fn running_after(polls: u64) -> Self {
        Self::with_script(false, AllocationScript::RunningAfter(polls))
    }

    /// Allocation stays `pending` forever; only the deadline ends a watch.
    pub fn never_running() -> Self {
        Self::with_script(false, AllocationScript::NeverRunning)
    }

    /// Every submit answers `false`, as if another replica always wins.
    pub fn submit_rejected() -> Self {
        Self::with_script(true, AllocationScript::RunningAfter(0))
    }

    /// Jobs whose conditional submit landed, in order.
    pub fn submitted(&self) -> Vec<Job> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Job names deleted, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

fn allocation(status: ClientStatus) -> Allocation {
    Allocation { id: "alloc-1".into(), client_status: status, version: 1, task_states: Default::default() }
}

#[async_trait]
impl SchedulerApi for ScriptedScheduler {
    async fn load_job(&self, _name: &str) -> Result<JobRecord, SchedulerError> {
        let state = self.state.lock().unwrap();
        Ok(JobRecord { job: state.submitted.last().cloned(), version: state.submitted.len() as u64 })
    }

    async fn submit_job(&self, job: &Job, _version: u64) -> Result<bool, SchedulerError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_submit {
            return Ok(false);
        }
        state.submitted.push(job.clone());
        Ok(true)
    }

    async fn poll_allocations(
        &self,
        _name: &str,
        index: u64,
        _wait: Duration,
    ) -> Result<Chunk<Allocation>, SchedulerError> {
        let (script, polls) = {
            let mut state = self.state.lock().unwrap();
            let polls = state.polls;
            state.polls += 1;
            (state.script, polls)
        };
        let status = match script {
            AllocationScript::RunningAfter(n) if polls >= n => ClientStatus::Running,
            _ => ClientStatus::Pending,
        };
        if status != ClientStatus::Running {
            tokio::time::sleep(HOLD).await;
        }
        Ok(Chunk { items: vec![allocation(status)], index: index + 1 })
    }
}

#[async_trait]
impl JobDeleter for ScriptedScheduler {
    async fn delete_job(&self, name: &str, _purge: bool) -> Result<(), SchedulerError> {
        self.state.lock().unwrap().deleted.push(name.to_string());
        Ok(())
    }
}

/// Scripted [`DiscoveryApi`]: passing by default, with per-service
/// overrides for critical and unregistered services.
#[derive(Default)]
pub struct ScriptedDiscovery {
    critical: BTreeSet<String>,
    absent: BTreeSet<String>,
    catalog: Mutex<Vec<String>>,
}

impl ScriptedDiscovery {
    pub fn all_passing() -> Self {
        Self::default()
    }

    pub fn critical_for(service: &str) -> Self {
        ScriptedDiscovery { critical: BTreeSet::from([service.to_string()]), ..Self::default() }
    }

    pub fn absent_for(service: &str) -> Self {
        ScriptedDiscovery { absent: BTreeSet::from([service.to_string()]), ..Self::default() }
    }

    pub fn set_catalog(&self, names: impl IntoIterator<Item = String>) {
        *self.catalog.lock().unwrap() = names.into_iter().collect();
    }
}

#[async_trait]
impl DiscoveryApi for ScriptedDiscovery {
    async fn poll_checks(
        &self,
        service: &str,
        index: u64,
        _wait: Duration,
    ) -> Result<Chunk<HealthCheck>, DiscoveryError> {
        tokio::time::sleep(HOLD).await;
        if self.absent.contains(service) {
            return Ok(Chunk::empty(index + 1));
        }
        let status = if self.critical.contains(service) {
            CheckStatus::Critical
        } else {
            CheckStatus::Passing
        };
        Ok(Chunk {
            items: vec![HealthCheck {
                status,
                service_name: service.to_string(),
                output: String::new(),
            }],
            index: index + 1,
        })
    }

    async fn poll_catalog(
        &self,
        index: u64,
        _wait: Duration,
    ) -> Result<Chunk<String>, DiscoveryError> {
        tokio::time::sleep(HOLD).await;
        Ok(Chunk { items: self.catalog.lock().unwrap().clone(), index: index + 1 })
    }
}

/// [`AddressResolver`] backed by a fixed table.
#[derive(Default)]
pub struct TableResolver {
    table: BTreeMap<String, ServiceAddress>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: &str, host: &str, port: u16) {
        self.table
            .insert(service.to_string(), ServiceAddress { host: host.to_string(), port });
    }

    /// Table mapping each name to `host` with ports counting up from
    /// 20000 in the given order.
    pub fn with_services(names: &[&str], host: &str) -> Self {
        let mut resolver = Self::new();
        for (i, name) in names.iter().enumerate() {
            resolver.insert(name, host, 20000 + i as u16);
        }
        resolver
    }
}

#[async_trait]
impl AddressResolver for TableResolver {
    async fn resolve(&self, service: &str) -> Result<ServiceAddress, ResolveError> {
        self.table
            .get(service)
            .cloned()
            .ok_or_else(|| ResolveError::NoRecords(service.to_string()))
    }
}
