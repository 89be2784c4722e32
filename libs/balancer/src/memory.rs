use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{BalancerApi, BalancerError, Listener};

/// In-memory [`BalancerApi`] for tests and local runs.
///
/// Mirrors the real balancer's port semantics: at most one listener per
/// external port, and adding to a bound port is a conflict, not an
/// overwrite. Every call is recorded in an op log so tests can assert
/// ordering, most importantly that removals land before additions.
#[derive(Default)]
pub struct MemoryBalancer {
    bound: Mutex<BTreeMap<u16, Listener>>,
    ops: Mutex<Vec<String>>,
}

impl MemoryBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed listeners without touching the op log.
    pub fn with_listeners(listeners: impl IntoIterator<Item = Listener>) -> Self {
        let bound = listeners.into_iter().map(|l| (l.balancer_port, l)).collect();
        MemoryBalancer { bound: Mutex::new(bound), ops: Mutex::new(Vec::new()) }
    }

    /// Current listener set, sorted by external port.
    pub fn listeners(&self) -> Vec<Listener> {
        self.bound.lock().unwrap().values().cloned().collect()
    }

    /// Every admin call made so far, in order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn log(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl BalancerApi for MemoryBalancer {
    async fn describe_listeners(&self) -> Result<Vec<Listener>, BalancerError> {
        self.log("describe".to_string());
        Ok(self.listeners())
    }

    async fn add_listeners(&self, listeners: &[Listener]) -> Result<(), BalancerError> {
        let mut bound = self.bound.lock().unwrap();
        for l in listeners {
            if bound.contains_key(&l.balancer_port) {
                return Err(BalancerError::PortConflict(l.balancer_port));
            }
        }
        for l in listeners {
            bound.insert(l.balancer_port, l.clone());
            self.log(format!("add:{}", l.balancer_port));
        }
        Ok(())
    }

    async fn remove_listeners(&self, ports: &[u16]) -> Result<(), BalancerError> {
        let mut bound = self.bound.lock().unwrap();
        for port in ports {
            bound.remove(port);
            self.log(format!("remove:{port}"));
        }
        Ok(())
    }
}
