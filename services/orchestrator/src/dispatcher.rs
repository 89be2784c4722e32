//! The coordination loop.
//!
//! Wakes on store change notifications for the three prefixes (requests,
//! waiting queue, allocation records), reconciles the queue against live
//! requests, runs one pairing saga at a time for the head of the queue, and
//! applies the saga's decision through CAS writes. Every lost CAS is
//! abandoned; the next notification re-drives the pass from current state.
//!
//! This is the only place a request's backing job is ever deleted: the
//! queue's lost path. Everything else that wants a request gone deletes the
//! request record and lets the cascade arrive here.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tandem_balancer::BalancerApi;
use tandem_store::{prepare_set, spawn_prefix_watch, PreparedSet, RecordStore};

use crate::config::Config;
use crate::discovery::DiscoveryApi;
use crate::events::{publish, SessionEvent};
use crate::job::pair_job;
use crate::keys;
use crate::pairing;
use crate::queue::WaitingQueue;
use crate::request::{Request, RequestState};
use crate::resolver::AddressResolver;
use crate::saga::{AllocationOrchestrator, SagaInput};
use crate::scheduler::{JobDeleter, SchedulerApi};

/// Key the resolved address map is attached under on a request record.
pub const SERVICES_KEY: &str = "pairing";

/// The dispatcher and its collaborators. One instance per orchestrator
/// process; replicas coordinate purely through CAS on the shared store.
pub struct Dispatcher {
    pub store: Arc<dyn RecordStore>,
    pub scheduler: Arc<dyn SchedulerApi>,
    pub deleter: Arc<dyn JobDeleter>,
    pub discovery: Arc<dyn DiscoveryApi>,
    pub resolver: Arc<dyn AddressResolver>,
    pub balancer: Option<Arc<dyn BalancerApi>>,
    pub config: Config,
    pub events: mpsc::Sender<SessionEvent>,
}

impl Dispatcher {
    /// Run until shutdown: three prefix watches feeding one sequential
    /// handler loop. Handler failures are logged and the pass re-runs on
    /// the next notification.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let (req_tx, mut req_rx) = mpsc::channel(1);
        let (wait_tx, mut wait_rx) = mpsc::channel(1);
        let (alloc_tx, mut alloc_rx) = mpsc::channel(1);

        let watches = [
            (keys::REQUESTS_PREFIX, req_tx),
            (keys::WAITING_KEY, wait_tx),
            (keys::ALLOCATIONS_PREFIX, alloc_tx),
        ]
        .map(|(prefix, tx)| {
            spawn_prefix_watch(
                self.store.clone(),
                prefix.to_string(),
                self.config.watch_wait,
                tx,
                shutdown.clone(),
            )
        });

        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                Some(()) = req_rx.recv() => {
                    if let Err(e) = self.on_requests_changed().await {
                        warn!(error = %e, "request pass failed");
                    }
                }
                Some(()) = wait_rx.recv() => {
                    if let Err(e) = self.on_waiting_changed().await {
                        warn!(error = %e, "pairing pass failed");
                    }
                }
                Some(()) = alloc_rx.recv() => {
                    if let Err(e) = self.on_allocations_changed().await {
                        warn!(error = %e, "pairing sync failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("dispatcher stopping");
                        break;
                    }
                }
            }
        }
        for handle in watches {
            handle.abort();
        }
    }

    /// Reconcile the waiting queue against live request records: drop ids
    /// whose request vanished (and tear their jobs down) or already left
    /// `waiting`, queue new `waiting` requests at the back.
    pub async fn on_requests_changed(&self) -> Result<()> {
        let snapshot = self.store.list(keys::REQUESTS_PREFIX).await?;
        let live: HashMap<&str, Request> = snapshot
            .entries
            .iter()
            .filter_map(|entry| {
                let id = keys::id_from_key(keys::REQUESTS_PREFIX, &entry.key)?;
                Some((id, entry.record.decode::<Request>()?))
            })
            .collect();

        let slot = prepare_set(self.store.as_ref(), keys::WAITING_KEY).await?;
        let mut queue: WaitingQueue = slot.decode().unwrap_or_default();

        // A promoted id can linger here when the promotion's queue write
        // lost its CAS to another replica; it is dropped without eviction.
        // Only vanished requests get their jobs torn down.
        let before = queue.len();
        let mut lost = Vec::new();
        queue.update(
            |id| matches!(live.get(id), Some(r) if r.state == RequestState::Waiting),
            |id| {
                if !live.contains_key(id) {
                    lost.push(id.to_string());
                }
            },
        );

        // New arrivals join the back in creation order.
        let mut arrivals: Vec<&Request> =
            live.values().filter(|r| r.state == RequestState::Waiting).collect();
        arrivals.sort_by_key(|r| r.created_at);

        let mut changed = queue.len() != before;
        for request in arrivals {
            if queue.enqueue(&request.id) {
                info!(request = %request.id, position = queue.len() - 1, "request queued");
                changed = true;
            }
        }

        if changed {
            if !self.persist_queue(slot, &queue).await? {
                // Another replica moved the queue; it owns this pass.
                return Ok(());
            }
            for id in &lost {
                self.evict(id).await?;
            }
        }
        self.announce_positions(&queue);
        Ok(())
    }

    /// Pair the head of the queue: the earliest-queued id whose request
    /// still exists and is `waiting`. One saga per pass.
    pub async fn on_waiting_changed(&self) -> Result<()> {
        let queue: WaitingQueue =
            self.store.load(keys::WAITING_KEY).await?.decode().unwrap_or_default();

        let mut candidate = None;
        for (id, _) in queue.positions() {
            let record = self.store.load(&keys::request_key(id)).await?;
            if let Some(request) = record.decode::<Request>() {
                if request.state == RequestState::Waiting {
                    candidate = Some(request);
                    break;
                }
            }
        }
        let Some(request) = candidate else {
            debug!("no pairable request queued");
            return Ok(());
        };

        let (job, declared) = pair_job(&request, &self.config);
        let saga = AllocationOrchestrator {
            scheduler: self.scheduler.as_ref(),
            discovery: self.discovery.as_ref(),
            resolver: self.resolver.as_ref(),
        };
        let input = SagaInput {
            job,
            declared,
            allocation_budget: self.config.allocation_timeout,
            health_budget: self.config.health_timeout,
            success_state: RequestState::Running,
            services_key: SERVICES_KEY.to_string(),
        };
        let decision = saga.run(&request.id, input).await?;
        debug!(request = %request.id, ?decision, "applying pairing decision");

        if decision.remove_user {
            // The requests watch picks the deletion up and cascades: queue
            // drop, job teardown, eviction event.
            self.store.delete(&keys::request_key(&request.id)).await?;
            return Ok(());
        }

        if decision.update_store {
            let slot = prepare_set(self.store.as_ref(), &keys::request_key(&request.id)).await?;
            let Some(mut current) = slot.decode::<Request>() else {
                debug!(request = %request.id, "request vanished mid-saga, dropping decision");
                return Ok(());
            };
            if let Some(state) = decision.new_state {
                current.state = state;
            }
            if let Some((key, map)) = decision.services {
                current.services.insert(key, map);
            }
            if !slot.set(current.to_value()).await? {
                debug!(request = %request.id, "request moved, abandoning decision");
                return Ok(());
            }
        }

        match decision.new_state {
            Some(RequestState::Running) => {
                let slot = prepare_set(self.store.as_ref(), keys::WAITING_KEY).await?;
                let mut queue: WaitingQueue = slot.decode().unwrap_or_default();
                if queue.remove(&request.id) && self.persist_queue(slot, &queue).await? {
                    info!(request = %request.id, "request promoted to running");
                    self.announce_positions(&queue);
                }
            }
            Some(RequestState::Waiting) => {
                let slot = prepare_set(self.store.as_ref(), keys::WAITING_KEY).await?;
                let mut queue: WaitingQueue = slot.decode().unwrap_or_default();
                queue.requeue_back(&request.id);
                if self.persist_queue(slot, &queue).await? {
                    info!(request = %request.id, "request requeued at the back");
                    self.announce_positions(&queue);
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Project complete allocation records onto session addresses and the
    /// balancer's listener set.
    pub async fn on_allocations_changed(&self) -> Result<()> {
        pairing::sync_pairings(
            self.store.as_ref(),
            self.balancer.as_deref(),
            &self.config,
            &self.events,
        )
        .await
    }

    async fn persist_queue(&self, slot: PreparedSet<'_>, queue: &WaitingQueue) -> Result<bool> {
        let landed = slot.set(serde_json::to_value(queue)?).await?;
        if !landed {
            debug!("waiting queue moved, abandoning write");
        }
        Ok(landed)
    }

    /// Tear down everything behind a request whose record is gone. The one
    /// and only job-deletion site.
    async fn evict(&self, id: &str) -> Result<()> {
        self.store.delete(&keys::allocation_key(id)).await?;
        self.deleter
            .delete_job(&keys::job_name(&self.config.service_prefix, id), true)
            .await?;
        info!(request = %id, "request evicted");
        publish(&self.events, SessionEvent::Evicted { id: id.to_string() });
        Ok(())
    }

    fn announce_positions(&self, queue: &WaitingQueue) {
        for (id, position) in queue.positions() {
            publish(&self.events, SessionEvent::Position { id: id.to_string(), position });
        }
    }
}
