use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::StoreError;

/// A record read from the store together with the version the store
/// reported for it at read time.
///
/// The version is the CAS guard for the next write. An absent key reads as
/// `value: None, version: 0`, and a write at version 0 succeeds only if the
/// key still does not exist when the write lands.
#[derive(Debug, Clone, PartialEq)]
pub struct CasRecord {
    /// Decoded JSON body, or `None` when the key does not exist.
    pub value: Option<serde_json::Value>,
    /// Store modify version. 0 means the key was absent.
    pub version: u64,
}

impl CasRecord {
    /// The record an absent key reads as.
    pub fn absent() -> Self {
        CasRecord { value: None, version: 0 }
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Decode the body into `T`. Returns `None` for absent keys and for
    /// bodies that do not parse, so callers treat corrupt records the same
    /// way they treat missing ones.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        let value = self.value.as_ref()?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// One key under a listed prefix.
#[derive(Debug, Clone)]
pub struct KvEntry {
    /// Full key path as stored, prefix included.
    pub key: String,
    pub record: CasRecord,
}

/// Every record under a prefix, plus the index the snapshot was taken at.
/// Feeding the index back into [`RecordStore::await_change`] blocks until
/// the prefix moves past this snapshot.
#[derive(Debug, Clone, Default)]
pub struct PrefixSnapshot {
    pub entries: Vec<KvEntry>,
    pub index: u64,
}

impl PrefixSnapshot {
    pub fn get(&self, key: &str) -> Option<&CasRecord> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.record)
    }
}

/// Versioned access to the coordination store.
///
/// All writes are compare-and-set. A `compare_and_put` that returns
/// `Ok(false)` lost a race: the key's version moved since it was read, and
/// the store was left untouched. Callers re-read and decide again.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read one key. Absent keys are `Ok(CasRecord::absent())`, not errors.
    async fn load(&self, key: &str) -> Result<CasRecord, StoreError>;

    /// Read every key under a prefix.
    async fn list(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError>;

    /// Write `value` to `key` if and only if the key is still at `version`.
    /// Returns whether the write landed.
    async fn compare_and_put(
        &self,
        key: &str,
        value: serde_json::Value,
        version: u64,
    ) -> Result<bool, StoreError>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Block until the prefix's index exceeds `seen_index` or `wait`
    /// elapses, then return the current index. The returned index never
    /// goes backwards; returning `seen_index` means nothing changed.
    async fn await_change(
        &self,
        prefix: &str,
        seen_index: u64,
        wait: Duration,
    ) -> Result<u64, StoreError>;
}

/// A key read in preparation for a CAS write.
///
/// Captures the record and its version in one load so the caller can
/// read-modify-write: inspect [`PreparedSet::decode`], build the new value,
/// then [`PreparedSet::set`] it. The write succeeds only if nobody else
/// wrote the key in between.
pub struct PreparedSet<'a> {
    store: &'a dyn RecordStore,
    key: String,
    record: CasRecord,
}

/// Load `key` and capture its version for a subsequent [`PreparedSet::set`].
pub async fn prepare_set<'a>(
    store: &'a dyn RecordStore,
    key: &str,
) -> Result<PreparedSet<'a>, StoreError> {
    let record = store.load(key).await?;
    Ok(PreparedSet { store, key: key.to_string(), record })
}

impl<'a> PreparedSet<'a> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The record as it looked when prepared.
    pub fn current(&self) -> &CasRecord {
        &self.record
    }

    pub fn exists(&self) -> bool {
        self.record.exists()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.record.decode()
    }

    /// Attempt the guarded write. `Ok(false)` means the key's version moved
    /// after `prepare_set` and nothing was written.
    pub async fn set(&self, value: serde_json::Value) -> Result<bool, StoreError> {
        self.store.compare_and_put(&self.key, value, self.record.version).await
    }
}
