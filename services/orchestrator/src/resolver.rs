//! Service address resolution against the discovery substrate's DNS.
//!
//! Resolution failures are never swallowed. A pairing's address map is
//! all-or-nothing: if any one name fails to resolve, the whole attempt is
//! aborted rather than persisting a partial map.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::future::join_all;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid dns endpoint {0}")]
    InvalidDnsAddress(String),

    #[error("dns lookup for {service} failed: {reason}")]
    Lookup { service: String, reason: String },

    #[error("no records for service {0}")]
    NoRecords(String),
}

/// A resolved service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve a registered service name to a live endpoint.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, service: &str) -> Result<ServiceAddress, ResolveError>;
}

/// Resolve every name in `services`, fanned out and joined. Any single
/// failure fails the whole map.
pub async fn resolve_all(
    resolver: &dyn AddressResolver,
    services: &[String],
) -> Result<BTreeMap<String, String>, ResolveError> {
    let lookups = services.iter().map(|name| async move {
        let address = resolver.resolve(name).await?;
        Ok((name.clone(), address.endpoint()))
    });
    join_all(lookups).await.into_iter().collect()
}

/// [`AddressResolver`] over the substrate's DNS interface. The port comes
/// from the SRV record, the host from the address record of the same name.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    domain: String,
}

impl DnsResolver {
    pub fn new(dns_address: &str, domain: impl Into<String>) -> Result<Self, ResolveError> {
        let addr: SocketAddr = dns_address
            .parse()
            .map_err(|_| ResolveError::InvalidDnsAddress(dns_address.to_string()))?;
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
        let resolver = TokioAsyncResolver::tokio(config, ResolverOpts::default());
        Ok(DnsResolver { resolver, domain: domain.into() })
    }

    fn fqdn(&self, service: &str) -> String {
        format!("{}.{}.", service, self.domain)
    }
}

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self, service: &str) -> Result<ServiceAddress, ResolveError> {
        let fqdn = self.fqdn(service);
        let srv = self.resolver.srv_lookup(fqdn.clone()).await.map_err(|e| {
            ResolveError::Lookup { service: service.to_string(), reason: e.to_string() }
        })?;
        let port = srv
            .iter()
            .next()
            .ok_or_else(|| ResolveError::NoRecords(service.to_string()))?
            .port();

        let ips = self.resolver.lookup_ip(fqdn).await.map_err(|e| {
            ResolveError::Lookup { service: service.to_string(), reason: e.to_string() }
        })?;
        let host = ips
            .iter()
            .next()
            .ok_or_else(|| ResolveError::NoRecords(service.to_string()))?
            .to_string();

        Ok(ServiceAddress { host, port })
    }
}
