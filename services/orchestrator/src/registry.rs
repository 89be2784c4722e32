//! Registry of per-service watch tasks.
//!
//! One orchestrator instance owns one registry; there is no process-wide
//! watch table. Each entry maps a service name to the task long-polling
//! its health. `sync` converges the registry onto the set of services that
//! currently exist: new names get a watch spawned, vanished names get
//! theirs aborted.

use std::collections::{HashMap, HashSet};

use tokio::task::JoinHandle;
use tracing::debug;

/// Watch tasks keyed by service name. Aborts everything it still holds on
/// drop, so a dropped registry leaks no tasks.
#[derive(Default)]
pub struct WatchRegistry {
    watches: HashMap<String, JoinHandle<()>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn contains(&self, service: &str) -> bool {
        self.watches.contains_key(service)
    }

    /// Converge on `desired`: abort watches for names no longer present,
    /// spawn (via `spawn`) watches for names not yet tracked. Finished
    /// tasks are reaped and respawned on their next appearance.
    pub fn sync(&mut self, desired: &HashSet<String>, mut spawn: impl FnMut(&str) -> JoinHandle<()>) {
        self.watches.retain(|service, handle| {
            let keep = desired.contains(service) && !handle.is_finished();
            if !keep {
                debug!(service = %service, "stopping service watch");
                handle.abort();
            }
            keep
        });
        for service in desired {
            if !self.watches.contains_key(service) {
                debug!(service = %service, "starting service watch");
                let handle = spawn(service);
                self.watches.insert(service.clone(), handle);
            }
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        for handle in self.watches.values() {
            handle.abort();
        }
    }
}
