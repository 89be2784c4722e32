//! The fair waiting queue.
//!
//! An ordered, deduplicated sequence of request ids, persisted as a single
//! store record. All mutation happens on an in-memory snapshot; the
//! dispatcher writes the snapshot back through CAS and treats a lost write
//! as "retry on the next notification".

use serde::{Deserialize, Serialize};

/// Waiting request ids in arrival order. Serializes as a bare id array so
/// the persisted record is exactly the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitingQueue {
    ids: Vec<String>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|q| q == id)
    }

    /// Append `id` unless it is already queued. Returns whether the queue
    /// changed.
    pub fn enqueue(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id.to_string());
        true
    }

    /// Drop `id` wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|q| q != id);
        before != self.ids.len()
    }

    /// Move `id` to the back of the queue. A restarted request re-enters
    /// behind everyone currently waiting; its old position is not kept.
    pub fn requeue_back(&mut self, id: &str) {
        self.remove(id);
        self.ids.push(id.to_string());
    }

    /// The earliest-arrived id still queued.
    pub fn next_in_queue(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    /// Drop every queued id for which `live` returns false, invoking
    /// `on_lost` exactly once per dropped id. The caller's `on_lost` path is
    /// the only place allowed to delete a request's backing job.
    pub fn update(&mut self, live: impl Fn(&str) -> bool, mut on_lost: impl FnMut(&str)) {
        self.ids.retain(|id| {
            let keep = live(id);
            if !keep {
                on_lost(id);
            }
            keep
        });
    }

    /// 0-based rank of every queued id, in queue order.
    pub fn positions(&self) -> impl Iterator<Item = (&str, usize)> {
        self.ids.iter().enumerate().map(|(pos, id)| (id.as_str(), pos))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|q| q == id)
    }
}
