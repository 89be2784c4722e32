//! Request and allocation records as persisted in the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a request. `Waiting` requests sit in the queue;
/// `Running` requests have a healthy pairing behind them. There is no
/// degraded state: a running pairing is never re-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Waiting,
    Running,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Waiting => f.write_str("waiting"),
            RequestState::Running => f.write_str("running"),
        }
    }
}

/// A user's session request. Created by the submission layer, mutated only
/// through the dispatcher's decision application, deleted only by the
/// eviction cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,

    /// Externally visible routing identities, assigned once at creation.
    pub user_to_hmi_prefix: String,
    pub hmi_to_core_prefix: String,
    pub broker_address_prefix: String,
    pub tcp_port_external: u16,

    pub state: RequestState,

    /// Caller-keyed maps of service name to resolved `host:port`, attached
    /// by a successful saga.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, BTreeMap<String, String>>,

    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Per-request connection data, filled in incrementally by the half
/// watches. Every field is written exactly once: merges only fill fields
/// that are still unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmi_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmi_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
}

impl AllocationRecord {
    /// All six fields resolved; the pairing can be projected.
    pub fn is_complete(&self) -> bool {
        self.hmi_address.is_some()
            && self.hmi_port.is_some()
            && self.broker_port.is_some()
            && self.core_address.is_some()
            && self.core_port.is_some()
            && self.tcp_port.is_some()
    }

    /// Fill the hmi half if unset. Returns whether anything was written.
    pub fn merge_hmi(&mut self, address: &str, port: u16, broker_port: u16) -> bool {
        let mut changed = false;
        if self.hmi_address.is_none() {
            self.hmi_address = Some(address.to_string());
            changed = true;
        }
        if self.hmi_port.is_none() {
            self.hmi_port = Some(port);
            changed = true;
        }
        if self.broker_port.is_none() {
            self.broker_port = Some(broker_port);
            changed = true;
        }
        changed
    }

    /// Fill the core half if unset. Returns whether anything was written.
    pub fn merge_core(&mut self, address: &str, port: u16, tcp_port: u16) -> bool {
        let mut changed = false;
        if self.core_address.is_none() {
            self.core_address = Some(address.to_string());
            changed = true;
        }
        if self.core_port.is_none() {
            self.core_port = Some(port);
            changed = true;
        }
        if self.tcp_port.is_none() {
            self.tcp_port = Some(tcp_port);
            changed = true;
        }
        changed
    }
}
