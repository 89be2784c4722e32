//! End-to-end lifecycle tests over in-memory collaborators.
//!
//! The full dispatcher and catalog sync run against a `MemoryStore` and
//! `MemoryBalancer` with scripted scheduler/discovery/DNS stand-ins,
//! verifying:
//!
//! 1. A request travels waiting -> queued -> paired -> running
//! 2. Resolved addresses land on the record and the balancer converges
//! 3. A pairing that never allocates is fully evicted
//! 4. The queue stays fair and positions are announced
//!
//! ## Running
//!
//! ```bash
//! cargo test -p tandem-e2e --test happy_path
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use tandem_balancer::{BalancerApi, Listener, MemoryBalancer};
use tandem_store::{MemoryStore, RecordStore};

use tandem_orchestrator::config::Config;
use tandem_orchestrator::discovery::{CheckStatus, DiscoveryApi, DiscoveryError, HealthCheck};
use tandem_orchestrator::dispatcher::{Dispatcher, SERVICES_KEY};
use tandem_orchestrator::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use tandem_orchestrator::keys;
use tandem_orchestrator::pairing::{self, PairingContext};
use tandem_orchestrator::provision::provision_request;
use tandem_orchestrator::queue::WaitingQueue;
use tandem_orchestrator::request::{Request, RequestState};
use tandem_orchestrator::resolver::{AddressResolver, ResolveError, ServiceAddress};
use tandem_orchestrator::scheduler::{
    Allocation, ClientStatus, Job, JobDeleter, JobRecord, SchedulerApi, SchedulerError,
};
use tandem_orchestrator::watch::Chunk;

/// Poll answers hold briefly like a real blocking query, so watch loops
/// tick instead of spinning.
const HOLD: Duration = Duration::from_millis(50);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.watch_wait = Duration::from_millis(200);
    config.allocation_timeout = Duration::from_secs(3);
    config.health_timeout = Duration::from_secs(3);
    config
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(HOLD).await;
    }
    panic!("timed out waiting for {what}");
}

// -- scripted collaborators --------------------------------------------------

struct StubSchedulerState {
    reject_submit: bool,
    running_after: Option<u64>,
    polls: u64,
    submitted: Vec<Job>,
    deleted: Vec<String>,
}

struct StubScheduler {
    state: Mutex<StubSchedulerState>,
}

impl StubScheduler {
    fn new(reject_submit: bool, running_after: Option<u64>) -> Arc<Self> {
        Arc::new(StubScheduler {
            state: Mutex::new(StubSchedulerState {
                reject_submit,
                running_after,
                polls: 0,
                submitted: Vec::new(),
                deleted: Vec::new(),
            }),
        })
    }

    fn running_after(polls: u64) -> Arc<Self> {
        Self::new(false, Some(polls))
    }

    fn never_running() -> Arc<Self> {
        Self::new(false, None)
    }

    fn submit_rejected() -> Arc<Self> {
        Self::new(true, Some(0))
    }

    fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    fn submitted(&self) -> Vec<Job> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl SchedulerApi for StubScheduler {
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
        let (running_after, polls) = {
            let mut state = self.state.lock().unwrap();
            let polls = state.polls;
            state.polls += 1;
            (state.running_after, polls)
        };
        let status = match running_after {
            Some(n) if polls >= n => ClientStatus::Running,
            _ => ClientStatus::Pending,
        };
        if status != ClientStatus::Running {
            tokio::time::sleep(HOLD).await;
        }
        let allocation = Allocation {
            id: "alloc-1".into(),
            client_status: status,
            version: 1,
            task_states: Default::default(),
        };
        Ok(Chunk { items: vec![allocation], index: index + 1 })
    }
}

#[async_trait]
impl JobDeleter for StubScheduler {
    async fn delete_job(&self, name: &str, _purge: bool) -> Result<(), SchedulerError> {
        self.state.lock().unwrap().deleted.push(name.to_string());
        Ok(())
    }
}

/// Every check passes; the catalog is fixed at construction.
struct StubDiscovery {
    catalog: Vec<String>,
}

#[async_trait]
impl DiscoveryApi for StubDiscovery {
    async fn poll_checks(
        &self,
        service: &str,
        index: u64,
        _wait: Duration,
    ) -> Result<Chunk<HealthCheck>, DiscoveryError> {
        tokio::time::sleep(HOLD).await;
        Ok(Chunk {
            items: vec![HealthCheck {
                status: CheckStatus::Passing,
                service_name: service.to_string(),
                output: String::new(),
            }],
            index: index + 1,
        })
    }

    async fn poll_catalog(&self, index: u64, _wait: Duration) -> Result<Chunk<String>, DiscoveryError> {
        tokio::time::sleep(HOLD).await;
        Ok(Chunk { items: self.catalog.clone(), index: index + 1 })
    }
}

struct StubResolver {
    table: BTreeMap<String, ServiceAddress>,
}

impl StubResolver {
    /// Resolve each name to `host` with ports counting up from 20000.
    fn with_services(names: &[String], host: &str) -> Self {
        let table = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                (name.clone(), ServiceAddress { host: host.to_string(), port: 20000 + i as u16 })
            })
            .collect();
        StubResolver { table }
    }
}

#[async_trait]
impl AddressResolver for StubResolver {
    async fn resolve(&self, service: &str) -> Result<ServiceAddress, ResolveError> {
        self.table
            .get(service)
            .cloned()
            .ok_or_else(|| ResolveError::NoRecords(service.to_string()))
    }
}

// -- harness -----------------------------------------------------------------

struct Cluster {
    store: Arc<MemoryStore>,
    scheduler: Arc<StubScheduler>,
    balancer: Arc<MemoryBalancer>,
    events: mpsc::Receiver<SessionEvent>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    /// Spin up the dispatcher and the catalog sync over in-memory
    /// collaborators, paired for the given request ids.
    fn start(config: Config, scheduler: Arc<StubScheduler>, request_ids: &[&str]) -> Cluster {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let balancer = Arc::new(MemoryBalancer::new());

        let prefix = config.service_prefix.clone();
        let mut catalog = Vec::new();
        let mut services = Vec::new();
        for id in request_ids {
            catalog.push(keys::hmi_service_name(&prefix, id));
            catalog.push(keys::core_service_name(&prefix, id));
            services.push(keys::hmi_service_name(&prefix, id));
            services.push(keys::core_service_name(&prefix, id));
            services.push(keys::broker_service_name(&prefix, id));
            services.push(keys::tcp_service_name(&prefix, id));
        }
        let discovery = Arc::new(StubDiscovery { catalog });
        let resolver = Arc::new(StubResolver::with_services(&services, "10.0.0.5"));

        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = Arc::new(Dispatcher {
            store: store.clone(),
            scheduler: scheduler.clone(),
            deleter: scheduler.clone(),
            discovery: discovery.clone(),
            resolver: resolver.clone(),
            balancer: Some(balancer.clone()),
            config: config.clone(),
            events: events_tx,
        });
        tokio::spawn(dispatcher.run(shutdown_rx.clone()));

        let ctx = Arc::new(PairingContext {
            store: store.clone(),
            discovery,
            resolver,
            config,
        });
        tokio::spawn(pairing::run_catalog_sync(ctx, shutdown_rx));

        Cluster { store, scheduler, balancer, events, shutdown }
    }

    async fn submit(&self, id: &str, existing: &[Request]) -> Request {
        let request = provision_request(id, existing, (9000, 9099)).unwrap();
        self.store
            .compare_and_put(&keys::request_key(id), serde_json::to_value(&request).unwrap(), 0)
            .await
            .unwrap();
        request
    }

    async fn request(&self, id: &str) -> Option<Request> {
        self.store.load(&keys::request_key(id)).await.unwrap().decode()
    }

    async fn queue(&self) -> WaitingQueue {
        self.store.load(keys::WAITING_KEY).await.unwrap().decode().unwrap_or_default()
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// -- tests -------------------------------------------------------------------

#[tokio::test]
async fn happy_path_pairs_promotes_and_projects() {
    let mut cluster =
        Cluster::start(test_config(), StubScheduler::running_after(1), &["alpha"]);
    let submitted = cluster.submit("alpha", &[]).await;

    // The request reaches running with its address map attached.
    eventually("request to reach running", || async {
        matches!(
            cluster.request("alpha").await,
            Some(r) if r.state == RequestState::Running && r.services.contains_key(SERVICES_KEY)
        )
    })
    .await;

    let request = cluster.request("alpha").await.unwrap();
    let map = &request.services[SERVICES_KEY];
    assert_eq!(map.len(), 4);
    assert!(map["tandem-hmi-alpha"].starts_with("10.0.0.5:"));
    assert!(cluster.queue().await.is_empty());
    assert_eq!(cluster.scheduler.submitted().len(), 1);

    // The half watches fill the allocation record and the balancer follows.
    eventually("balancer to carry the pairing's tcp listener", || async {
        cluster.balancer.listeners()
            == vec![Listener::tcp(submitted.tcp_port_external, submitted.tcp_port_external)]
    })
    .await;

    let events = cluster.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Addresses { id, .. } if id == "alpha")));
}

#[tokio::test]
async fn failed_allocation_is_fully_evicted() {
    let mut config = test_config();
    config.allocation_timeout = Duration::from_millis(300);
    // No services ever register: the job never runs.
    let mut cluster = Cluster::start(config, StubScheduler::never_running(), &[]);
    cluster.submit("beta", &[]).await;

    eventually("request record to be deleted", || async {
        cluster.request("beta").await.is_none()
    })
    .await;
    eventually("queue slot to be dropped and job torn down", || async {
        cluster.queue().await.is_empty()
            && cluster.scheduler.deleted().contains(&"tandem-pair-beta".to_string())
    })
    .await;

    let events = cluster.drain_events();
    assert!(events.contains(&SessionEvent::Evicted { id: "beta".into() }));
}

#[tokio::test]
async fn queue_stays_fair_and_announces_positions() {
    let ids = ["qa", "qb", "qc"];
    let mut cluster = Cluster::start(test_config(), StubScheduler::submit_rejected(), &[]);

    let mut existing = Vec::new();
    for id in ids {
        existing.push(cluster.submit(id, &existing).await);
        // Distinct creation times fix the arrival order.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    eventually("all three requests to be queued", || async {
        cluster.queue().await.len() == 3
    })
    .await;

    let queue = cluster.queue().await;
    assert_eq!(queue.position("qa"), Some(0));
    assert_eq!(queue.position("qb"), Some(1));
    assert_eq!(queue.position("qc"), Some(2));

    let events = cluster.drain_events();
    assert!(events.contains(&SessionEvent::Position { id: "qa".into(), position: 0 }));
    for id in ids {
        let request = cluster.request(id).await.unwrap();
        assert_eq!(request.state, RequestState::Waiting);
    }
}
