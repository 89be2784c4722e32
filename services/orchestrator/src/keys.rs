//! Naming conventions: store key layout, job names, per-pairing service
//! names.

/// Request records live under `tandem/requests/data/<id>`.
pub const REQUESTS_PREFIX: &str = "tandem/requests/data";

/// The waiting queue snapshot is one record at this key.
pub const WAITING_KEY: &str = "tandem/waiting/data";

/// Allocation records live under `tandem/allocations/data/<id>`.
pub const ALLOCATIONS_PREFIX: &str = "tandem/allocations/data";

pub fn request_key(id: &str) -> String {
    format!("{REQUESTS_PREFIX}/{id}")
}

pub fn allocation_key(id: &str) -> String {
    format!("{ALLOCATIONS_PREFIX}/{id}")
}

/// Inverse of [`request_key`] / [`allocation_key`] for listed entries.
pub fn id_from_key<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}

/// The two halves of a pairing, as they appear in service names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHalf {
    Hmi,
    Core,
}

pub fn job_name(service_prefix: &str, id: &str) -> String {
    format!("{service_prefix}-pair-{id}")
}

pub fn hmi_service_name(service_prefix: &str, id: &str) -> String {
    format!("{service_prefix}-hmi-{id}")
}

pub fn core_service_name(service_prefix: &str, id: &str) -> String {
    format!("{service_prefix}-core-{id}")
}

pub fn broker_service_name(service_prefix: &str, id: &str) -> String {
    format!("{service_prefix}-broker-{id}")
}

pub fn tcp_service_name(service_prefix: &str, id: &str) -> String {
    format!("{service_prefix}-tcp-{id}")
}

/// Recognize a health-watched per-pairing service name and recover which
/// half it is and the request id it belongs to. Broker/tcp port services
/// are not health-watched and return `None`.
pub fn parse_service_name(service_prefix: &str, name: &str) -> Option<(ServiceHalf, String)> {
    let rest = name.strip_prefix(service_prefix)?.strip_prefix('-')?;
    if let Some(id) = rest.strip_prefix("hmi-") {
        (!id.is_empty()).then(|| (ServiceHalf::Hmi, id.to_string()))
    } else if let Some(id) = rest.strip_prefix("core-") {
        (!id.is_empty()).then(|| (ServiceHalf::Core, id.to_string()))
    } else {
        None
    }
}
