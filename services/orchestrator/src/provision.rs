//! Request provisioning: unique routing prefixes and external ports.
//!
//! Used by the submission layer when a request record is first created.
//! Every externally visible identity is assigned here, once, against the
//! identities already in use.

use std::collections::HashSet;

use chrono::Utc;
use rand::distr::{Alphanumeric, SampleString};
use rand::seq::IteratorRandom;
use thiserror::Error;

use crate::request::{Request, RequestState};

/// Length of generated routing prefixes.
const PREFIX_LEN: usize = 12;

/// Attempts before a generator is declared stuck. With a 12-character
/// alphanumeric space this only trips on a broken generator.
const MAX_ATTEMPTS: usize = 1000;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no free port in {start}..={end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("could not generate an unused identifier after {0} attempts")]
    GeneratorExhausted(usize),
}

/// Draw values from `generate` until one misses the blacklist.
pub fn unique_string(
    blacklist: &HashSet<String>,
    mut generate: impl FnMut() -> String,
) -> Result<String, ProvisionError> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = generate();
        if !blacklist.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ProvisionError::GeneratorExhausted(MAX_ATTEMPTS))
}

/// Uniform pick from the ports in `start..=end` not on the blacklist.
pub fn unique_port(range: (u16, u16), blacklist: &HashSet<u16>) -> Result<u16, ProvisionError> {
    let (start, end) = range;
    (start..=end)
        .filter(|p| !blacklist.contains(p))
        .choose(&mut rand::rng())
        .ok_or(ProvisionError::PortsExhausted { start, end })
}

fn random_prefix() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), PREFIX_LEN).to_lowercase()
}

/// Build a fresh `Waiting` request whose prefixes and external TCP port
/// collide with nothing in `existing`.
pub fn provision_request(
    id: &str,
    existing: &[Request],
    tcp_port_range: (u16, u16),
) -> Result<Request, ProvisionError> {
    let mut used: HashSet<String> = HashSet::new();
    for req in existing {
        used.insert(req.user_to_hmi_prefix.clone());
        used.insert(req.hmi_to_core_prefix.clone());
        used.insert(req.broker_address_prefix.clone());
    }
    let used_ports: HashSet<u16> = existing.iter().map(|r| r.tcp_port_external).collect();

    let user_to_hmi_prefix = unique_string(&used, random_prefix)?;
    used.insert(user_to_hmi_prefix.clone());
    let hmi_to_core_prefix = unique_string(&used, random_prefix)?;
    used.insert(hmi_to_core_prefix.clone());
    let broker_address_prefix = unique_string(&used, random_prefix)?;

    Ok(Request {
        id: id.to_string(),
        user_to_hmi_prefix,
        hmi_to_core_prefix,
        broker_address_prefix,
        tcp_port_external: unique_port(tcp_port_range, &used_ports)?,
        state: RequestState::Waiting,
        services: Default::default(),
        created_at: Utc::now(),
    })
}
