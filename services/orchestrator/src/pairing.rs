//! Pairing assembly and the continuous per-service health watches.
//!
//! After a request is promoted, one watch per half of its pairing keeps
//! long-polling that half's health. The first `passing` observation
//! resolves the half's addresses and merges them into the request's
//! allocation record, each field written exactly once. Complete records
//! joined with live requests become [`Pairing`]s, which drive the session
//! address events and the balancer's expected listener set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tandem_balancer::{reconcile, BalancerApi, Listener};
use tandem_store::{prepare_set, RecordStore};

use crate::config::Config;
use crate::discovery::{CheckStatus, DiscoveryApi};
use crate::events::{publish, SessionEvent};
use crate::keys::{self, ServiceHalf};
use crate::registry::WatchRegistry;
use crate::request::{AllocationRecord, Request};
use crate::resolver::AddressResolver;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// A live pairing: the four resolved internal endpoints and the external
/// identities the edge routes to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pairing {
    pub id: String,

    /// Internal `host:port` endpoints.
    pub hmi: String,
    pub core: String,
    pub tcp: String,
    pub broker: String,

    /// External counterparts, assigned at provisioning.
    pub user_to_hmi_prefix: String,
    pub hmi_to_core_prefix: String,
    pub broker_address_prefix: String,
    pub tcp_port_external: u16,
}

/// Join a request with its allocation record. `None` until every field of
/// the record has been filled in by the half watches.
pub fn assemble(request: &Request, record: &AllocationRecord) -> Option<Pairing> {
    if !record.is_complete() {
        return None;
    }
    let hmi_host = record.hmi_address.as_deref()?;
    let core_host = record.core_address.as_deref()?;
    Some(Pairing {
        id: request.id.clone(),
        hmi: format!("{hmi_host}:{}", record.hmi_port?),
        core: format!("{core_host}:{}", record.core_port?),
        tcp: format!("{core_host}:{}", record.tcp_port?),
        broker: format!("{hmi_host}:{}", record.broker_port?),
        user_to_hmi_prefix: request.user_to_hmi_prefix.clone(),
        hmi_to_core_prefix: request.hmi_to_core_prefix.clone(),
        broker_address_prefix: request.broker_address_prefix.clone(),
        tcp_port_external: request.tcp_port_external,
    })
}

/// The listener set the balancer should carry: the fixed TLS-terminating
/// web listeners plus one TCP port-through per live pairing.
pub fn expected_listeners(pairings: &[Pairing], config: &Config) -> Vec<Listener> {
    let mut expected = Vec::with_capacity(pairings.len() + 2);
    if let Some(cert) = &config.ssl_certificate {
        expected.push(Listener::https(443, config.web_port, cert.clone()));
        expected.push(Listener::ssl(config.ssl_listener_port, config.web_port, cert.clone()));
    }
    for pairing in pairings {
        expected.push(Listener::tcp(pairing.tcp_port_external, pairing.tcp_port_external));
    }
    expected
}

/// Shared collaborators of the continuous watches.
pub struct PairingContext {
    pub store: Arc<dyn RecordStore>,
    pub discovery: Arc<dyn DiscoveryApi>,
    pub resolver: Arc<dyn AddressResolver>,
    pub config: Config,
}

/// Resolve one half's addresses and merge them into the allocation
/// record. Fields already set are left alone, so repeat `passing` ticks
/// and concurrent replicas converge on the first write.
async fn merge_half(ctx: &PairingContext, half: ServiceHalf, id: &str) -> Result<()> {
    let key = keys::allocation_key(id);
    let slot = prepare_set(ctx.store.as_ref(), &key).await?;
    let mut record: AllocationRecord = slot.decode().unwrap_or_default();

    let already_merged = match half {
        ServiceHalf::Hmi => record.hmi_address.is_some(),
        ServiceHalf::Core => record.core_address.is_some(),
    };
    if already_merged {
        return Ok(());
    }

    let prefix = &ctx.config.service_prefix;
    let changed = match half {
        ServiceHalf::Hmi => {
            let hmi = ctx.resolver.resolve(&keys::hmi_service_name(prefix, id)).await?;
            let broker = ctx.resolver.resolve(&keys::broker_service_name(prefix, id)).await?;
            record.merge_hmi(&hmi.host, hmi.port, broker.port)
        }
        ServiceHalf::Core => {
            let core = ctx.resolver.resolve(&keys::core_service_name(prefix, id)).await?;
            let tcp = ctx.resolver.resolve(&keys::tcp_service_name(prefix, id)).await?;
            record.merge_core(&core.host, core.port, tcp.port)
        }
    };

    if changed {
        if slot.set(serde_json::to_value(&record)?).await? {
            info!(request = %id, half = ?half, "allocation record half merged");
        } else {
            // Lost the record race; the next passing tick re-reads.
            debug!(request = %id, half = ?half, "allocation record moved, abandoning merge");
        }
    }
    Ok(())
}

/// Continuously watch one half's health. Runs until aborted by the
/// registry when the service leaves the catalog.
pub async fn run_half_watch(ctx: Arc<PairingContext>, half: ServiceHalf, id: String) {
    let prefix = &ctx.config.service_prefix;
    let service = match half {
        ServiceHalf::Hmi => keys::hmi_service_name(prefix, &id),
        ServiceHalf::Core => keys::core_service_name(prefix, &id),
    };

    let mut index = 0u64;
    let mut seen_check = false;
    loop {
        let chunk = match ctx.discovery.poll_checks(&service, index, ctx.config.watch_wait).await {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(service = %service, error = %e, "health poll failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };
        index = index.max(chunk.index);

        let Some(check) = chunk.items.into_iter().next() else {
            // A check that existed and is now gone means the instance
            // deregistered. For the core half that kills the pairing; an
            // empty response before the first check is just startup.
            if seen_check && half == ServiceHalf::Core {
                warn!(request = %id, "core half deregistered, evicting request");
                evict_request(&ctx, &id).await;
            }
            continue;
        };
        seen_check = true;
        match check.status {
            CheckStatus::Passing => {
                if let Err(e) = merge_half(&ctx, half, &id).await {
                    warn!(service = %service, error = %e, "half merge failed, next tick retries");
                }
            }
            CheckStatus::Critical if half == ServiceHalf::Core => {
                // A dead core is unrecoverable for the pairing: drop the
                // request record and let the eviction cascade clean up.
                warn!(request = %id, output = %check.output, "core half critical, evicting request");
                evict_request(&ctx, &id).await;
            }
            _ => {}
        }
    }
}

async fn evict_request(ctx: &PairingContext, id: &str) {
    if let Err(e) = ctx.store.delete(&keys::request_key(id)).await {
        warn!(request = %id, error = %e, "evicting dead pairing failed");
    }
}

fn spawn_half_watch(ctx: Arc<PairingContext>, name: &str) -> JoinHandle<()> {
    match keys::parse_service_name(&ctx.config.service_prefix, name) {
        Some((half, id)) => tokio::spawn(run_half_watch(ctx, half, id)),
        // Names are filtered before sync; an unparsable one gets a no-op
        // task that the next sync reaps.
        None => tokio::spawn(async {}),
    }
}

/// Keep the watch registry converged on the per-pairing services the
/// catalog currently carries.
pub async fn run_catalog_sync(ctx: Arc<PairingContext>, mut shutdown: watch::Receiver<bool>) {
    let mut registry = WatchRegistry::new();
    let mut index = 0u64;
    loop {
        tokio::select! {
            res = ctx.discovery.poll_catalog(index, ctx.config.watch_wait) => match res {
                Ok(chunk) => {
                    index = index.max(chunk.index);
                    let desired = chunk
                        .items
                        .iter()
                        .filter(|name| {
                            keys::parse_service_name(&ctx.config.service_prefix, name).is_some()
                        })
                        .cloned()
                        .collect();
                    registry.sync(&desired, |name| spawn_half_watch(ctx.clone(), name));
                }
                Err(e) => {
                    warn!(error = %e, "catalog poll failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("catalog sync stopping");
                    return;
                }
            }
        }
    }
}

/// One pairing pass: join complete allocation records with live requests,
/// announce their addresses, and converge the balancer's listener set.
/// Stale allocation records whose request is gone are ignored.
pub async fn sync_pairings(
    store: &dyn RecordStore,
    balancer: Option<&dyn BalancerApi>,
    config: &Config,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let requests = store.list(keys::REQUESTS_PREFIX).await?;
    let live: HashMap<String, Request> = requests
        .entries
        .iter()
        .filter_map(|entry| {
            let request: Request = entry.record.decode()?;
            Some((request.id.clone(), request))
        })
        .collect();

    let allocations = store.list(keys::ALLOCATIONS_PREFIX).await?;
    let mut pairings = Vec::new();
    for entry in &allocations.entries {
        let Some(id) = keys::id_from_key(keys::ALLOCATIONS_PREFIX, &entry.key) else {
            continue;
        };
        let Some(record) = entry.record.decode::<AllocationRecord>() else {
            continue;
        };
        let Some(request) = live.get(id) else {
            debug!(request = %id, "allocation record without request, ignoring");
            continue;
        };
        if let Some(pairing) = assemble(request, &record) {
            publish(events, SessionEvent::Addresses { id: id.to_string(), pairing: pairing.clone() });
            pairings.push(pairing);
        }
    }

    if let Some(api) = balancer {
        let expected = expected_listeners(&pairings, config);
        reconcile(api, &expected).await?;
    }
    Ok(())
}
