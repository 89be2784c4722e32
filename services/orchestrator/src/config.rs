//! Configuration for the orchestrator.

use std::time::Duration;

use anyhow::{Context, Result};

/// Orchestrator configuration, loaded from `TANDEM_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store base URL.
    pub store_url: String,

    /// Cluster scheduler base URL.
    pub scheduler_url: String,

    /// Edge balancer admin URL. `None` disables listener reconciliation.
    pub balancer_url: Option<String>,

    /// Discovery substrate base URL (health checks, service catalog).
    pub discovery_url: String,

    /// DNS endpoint of the discovery substrate, `host:port`.
    pub dns_address: String,

    /// Search domain appended to service names for DNS resolution.
    pub dns_domain: String,

    /// Prefix for job names and per-pairing service names.
    pub service_prefix: String,

    /// Budget for an allocation to reach `running` after job submission.
    pub allocation_timeout: Duration,

    /// Budget for all health checks to reach `passing` once allocated.
    pub health_timeout: Duration,

    /// Server-side hold for blocking store/catalog reads.
    pub watch_wait: Duration,

    /// Inclusive range external TCP ports are assigned from.
    pub tcp_port_range: (u16, u16),

    /// Instance port the fixed web listeners forward to.
    pub web_port: u16,

    /// External port of the fixed TLS websocket listener.
    pub ssl_listener_port: u16,

    /// Certificate id for the TLS-terminating fixed listeners.
    pub ssl_certificate: Option<String>,

    /// Container images for the two halves of a pairing.
    pub hmi_image: String,
    pub core_image: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let store_url = env_or("TANDEM_STORE_URL", "http://127.0.0.1:8500");
        let scheduler_url = env_or("TANDEM_SCHEDULER_URL", "http://127.0.0.1:4646");
        let discovery_url = env_or("TANDEM_DISCOVERY_URL", "http://127.0.0.1:8500");
        let balancer_url = std::env::var("TANDEM_BALANCER_URL").ok();

        let dns_address = env_or("TANDEM_DNS_ADDR", "127.0.0.1:8600");
        let dns_domain = env_or("TANDEM_DNS_DOMAIN", "service.tandem");
        let service_prefix = env_or("TANDEM_SERVICE_PREFIX", "tandem");

        let allocation_timeout =
            Duration::from_secs(env_parse("TANDEM_ALLOCATION_TIMEOUT_SECS", 30));
        let health_timeout = Duration::from_secs(env_parse("TANDEM_HEALTH_TIMEOUT_SECS", 30));
        let watch_wait = Duration::from_secs(env_parse("TANDEM_WATCH_WAIT_SECS", 60));

        let port_start: u16 = env_parse("TANDEM_TCP_PORT_START", 9000);
        let port_end: u16 = env_parse("TANDEM_TCP_PORT_END", 9999);
        if port_start > port_end {
            anyhow::bail!(
                "TANDEM_TCP_PORT_START ({port_start}) exceeds TANDEM_TCP_PORT_END ({port_end})"
            );
        }

        let web_port = env_parse("TANDEM_WEB_PORT", 4000);
        let ssl_listener_port = env_parse("TANDEM_SSL_LISTENER_PORT", 444);
        let ssl_certificate = std::env::var("TANDEM_SSL_CERTIFICATE").ok();
        if balancer_url.is_some() {
            ssl_certificate
                .as_ref()
                .context("TANDEM_SSL_CERTIFICATE is required when TANDEM_BALANCER_URL is set")?;
        }

        let hmi_image = env_or("TANDEM_HMI_IMAGE", "tandem/hmi:latest");
        let core_image = env_or("TANDEM_CORE_IMAGE", "tandem/core:latest");

        Ok(Self {
            store_url,
            scheduler_url,
            balancer_url,
            discovery_url,
            dns_address,
            dns_domain,
            service_prefix,
            allocation_timeout,
            health_timeout,
            watch_wait,
            tcp_port_range: (port_start, port_end),
            web_port,
            ssl_listener_port,
            ssl_certificate,
            hmi_image,
            core_image,
        })
    }
}

impl Default for Config {
    /// Defaults suitable for tests: local endpoints, balancer disabled.
    fn default() -> Self {
        Config {
            store_url: "http://127.0.0.1:8500".into(),
            scheduler_url: "http://127.0.0.1:4646".into(),
            balancer_url: None,
            discovery_url: "http://127.0.0.1:8500".into(),
            dns_address: "127.0.0.1:8600".into(),
            dns_domain: "service.tandem".into(),
            service_prefix: "tandem".into(),
            allocation_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(30),
            watch_wait: Duration::from_secs(60),
            tcp_port_range: (9000, 9999),
            web_port: 4000,
            ssl_listener_port: 444,
            ssl_certificate: None,
            hmi_image: "tandem/hmi:latest".into(),
            core_image: "tandem/core:latest".into(),
        }
    }
}
