use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use crate::{CasRecord, KvEntry, PrefixSnapshot, RecordStore, StoreError};

struct Stored {
    value: serde_json::Value,
    version: u64,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Stored>,
    /// Last index each key moved at, deletes included. Keeping deleted keys
    /// here is what lets a prefix watch observe the removal of its last key.
    touched: BTreeMap<String, u64>,
    index: u64,
}

/// In-memory [`RecordStore`] with the same CAS and blocking-read semantics
/// as [`crate::HttpKvStore`]. Backs tests and local runs.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    changed: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changed, _) = watch::channel(0);
        MemoryStore { inner: Mutex::new(Inner::default()), changed }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix_index(&self, prefix: &str) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner
            .touched
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, idx)| *idx)
            .max()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<CasRecord, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(match inner.entries.get(key) {
            Some(stored) => CasRecord {
                value: Some(stored.value.clone()),
                version: stored.version,
            },
            None => CasRecord::absent(),
        })
    }

    async fn list(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError> {
        let inner = self.inner.lock().unwrap();
        let entries = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, stored)| KvEntry {
                key: k.clone(),
                record: CasRecord {
                    value: Some(stored.value.clone()),
                    version: stored.version,
                },
            })
            .collect();
        drop(inner);
        Ok(PrefixSnapshot { entries, index: self.prefix_index(prefix) })
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: serde_json::Value,
        version: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.entries.get(key).map(|s| s.version).unwrap_or(0);
        if current != version {
            return Ok(false);
        }
        inner.index += 1;
        let index = inner.index;
        inner.entries.insert(key.to_string(), Stored { value, version: index });
        inner.touched.insert(key.to_string(), index);
        drop(inner);
        let _ = self.changed.send(index);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.remove(key).is_some() {
            inner.index += 1;
            let index = inner.index;
            inner.touched.insert(key.to_string(), index);
            drop(inner);
            let _ = self.changed.send(index);
        }
        Ok(())
    }

    async fn await_change(
        &self,
        prefix: &str,
        seen_index: u64,
        wait: Duration,
    ) -> Result<u64, StoreError> {
        let mut rx = self.changed.subscribe();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let current = self.prefix_index(prefix);
            if current > seen_index {
                return Ok(current);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(seen_index);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(current.max(seen_index));
                }
            }
        }
    }
}
