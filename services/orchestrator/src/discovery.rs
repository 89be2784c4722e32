//! Discovery substrate client: service health checks and the fleet
//! catalog.
//!
//! Both surfaces are blocking reads with the same index/wait protocol as
//! the record store. Health is watched per service; the catalog feeds the
//! watch registry the set of per-pairing services that currently exist.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::watch::Chunk;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LONG_POLL_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery transport error: {0}")]
    Transport(String),

    #[error("unexpected discovery status {status} for {resource}")]
    UnexpectedStatus { status: u16, resource: String },
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        DiscoveryError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
    #[serde(other)]
    Unknown,
}

/// One service's health check record. At most one is expected per watched
/// service name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub service_name: String,
    /// Last check output, carried for failure logging.
    #[serde(default)]
    pub output: String,
}

/// Blocking reads against the discovery substrate.
#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Blocking read of one service's health checks past `index`.
    async fn poll_checks(
        &self,
        service: &str,
        index: u64,
        wait: Duration,
    ) -> Result<Chunk<HealthCheck>, DiscoveryError>;

    /// Blocking read of the registered service names past `index`.
    async fn poll_catalog(&self, index: u64, wait: Duration)
        -> Result<Chunk<String>, DiscoveryError>;
}

/// [`DiscoveryApi`] over the substrate's HTTP API. The next change index
/// rides the same response header the record store uses; health and KV are
/// one substrate.
pub struct HttpDiscovery {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDiscovery {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpDiscovery { http, base_url })
    }

    async fn blocking_get(
        &self,
        url: String,
        resource: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(reqwest::Response, u64), DiscoveryError> {
        let wait_secs = wait.as_secs();
        let resp = self
            .http
            .get(url)
            .query(&[("index", index.to_string()), ("wait", format!("{wait_secs}s"))])
            .timeout(wait + LONG_POLL_MARGIN)
            .send()
            .await?;
        let next = resp
            .headers()
            .get(tandem_store::INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(index)
            .max(index);
        if resp.status() != StatusCode::OK && resp.status() != StatusCode::NOT_FOUND {
            return Err(DiscoveryError::UnexpectedStatus {
                status: resp.status().as_u16(),
                resource: resource.to_string(),
            });
        }
        Ok((resp, next))
    }
}

#[async_trait]
impl DiscoveryApi for HttpDiscovery {
    async fn poll_checks(
        &self,
        service: &str,
        index: u64,
        wait: Duration,
    ) -> Result<Chunk<HealthCheck>, DiscoveryError> {
        let url = format!("{}/v1/health/checks/{}", self.base_url, service);
        let (resp, next) = self.blocking_get(url, service, index, wait).await?;
        match resp.json::<Vec<HealthCheck>>().await {
            Ok(items) => Ok(Chunk { items, index: next }),
            Err(e) => {
                debug!(service = %service, error = %e, "check body did not parse, reading as empty");
                Ok(Chunk::empty(next))
            }
        }
    }

    async fn poll_catalog(
        &self,
        index: u64,
        wait: Duration,
    ) -> Result<Chunk<String>, DiscoveryError> {
        let url = format!("{}/v1/catalog/services", self.base_url);
        let (resp, next) = self.blocking_get(url, "catalog", index, wait).await?;
        match resp.json::<BTreeMap<String, Vec<String>>>().await {
            Ok(services) => Ok(Chunk { items: services.into_keys().collect(), index: next }),
            Err(e) => {
                debug!(error = %e, "catalog body did not parse, reading as empty");
                Ok(Chunk::empty(next))
            }
        }
    }
}
