//! tandem orchestrator
//!
//! Entry point: wires the HTTP collaborators (store, scheduler, discovery,
//! DNS, optional balancer) into the dispatcher and the catalog sync, then
//! runs both until a shutdown signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tandem_balancer::{BalancerApi, HttpBalancer};
use tandem_store::HttpKvStore;

use tandem_orchestrator::config::Config;
use tandem_orchestrator::discovery::HttpDiscovery;
use tandem_orchestrator::dispatcher::Dispatcher;
use tandem_orchestrator::events::{SessionEvent, EVENT_CHANNEL_CAPACITY};
use tandem_orchestrator::pairing::{self, PairingContext};
use tandem_orchestrator::resolver::DnsResolver;
use tandem_orchestrator::scheduler::HttpScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tandem orchestrator");

    let config = Config::from_env()?;
    info!(
        store_url = %config.store_url,
        scheduler_url = %config.scheduler_url,
        discovery_url = %config.discovery_url,
        balancer = config.balancer_url.is_some(),
        "Configuration loaded"
    );

    let store = Arc::new(HttpKvStore::new(&config.store_url).context("store client")?);
    let scheduler =
        Arc::new(HttpScheduler::new(&config.scheduler_url).context("scheduler client")?);
    let discovery =
        Arc::new(HttpDiscovery::new(&config.discovery_url).context("discovery client")?);
    let resolver = Arc::new(
        DnsResolver::new(&config.dns_address, config.dns_domain.clone())
            .context("dns resolver")?,
    );
    let balancer: Option<Arc<dyn BalancerApi>> = match &config.balancer_url {
        Some(url) => Some(Arc::new(HttpBalancer::new(url).context("balancer client")?)),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Session events go to the web layer; until one is attached, a drain
    // task keeps the channel moving and logs what would have been sent.
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            debug!(?event, "session event");
        }
    });

    let dispatcher = Arc::new(Dispatcher {
        store: store.clone(),
        scheduler: scheduler.clone(),
        deleter: scheduler,
        discovery: discovery.clone(),
        resolver: resolver.clone(),
        balancer,
        config: config.clone(),
        events: events_tx,
    });
    let dispatcher_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            dispatcher.run(shutdown_rx).await;
        }
    });

    let pairing_ctx = Arc::new(PairingContext {
        store,
        discovery,
        resolver,
        config,
    });
    let catalog_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            pairing::run_catalog_sync(pairing_ctx, shutdown_rx).await;
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = dispatcher_handle => {
            info!("Dispatcher exited");
        }
        _ = catalog_handle => {
            info!("Catalog sync exited");
        }
    }

    let _ = shutdown_tx.send(true);
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("Orchestrator shutdown complete");
    Ok(())
}
