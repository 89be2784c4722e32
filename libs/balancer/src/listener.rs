use serde::{Deserialize, Serialize};

/// One port binding on the edge balancer.
///
/// `balancer_port` is the externally reachable port and the listener's
/// identity: the balancer carries at most one listener per external port,
/// and removals are addressed by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Listener {
    pub protocol: Protocol,
    pub balancer_port: u16,
    pub instance_protocol: Protocol,
    pub instance_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate_id: Option<String>,
}

impl Listener {
    /// Plain TCP forward, the shape every pairing-derived listener takes.
    pub fn tcp(balancer_port: u16, instance_port: u16) -> Self {
        Listener {
            protocol: Protocol::Tcp,
            balancer_port,
            instance_protocol: Protocol::Tcp,
            instance_port,
            ssl_certificate_id: None,
        }
    }

    /// TLS-terminating raw forward, for websocket traffic the HTTP layer
    /// would mangle.
    pub fn ssl(balancer_port: u16, instance_port: u16, certificate_id: impl Into<String>) -> Self {
        Listener {
            protocol: Protocol::Ssl,
            balancer_port,
            instance_protocol: Protocol::Tcp,
            instance_port,
            ssl_certificate_id: Some(certificate_id.into()),
        }
    }

    /// TLS-terminating HTTP forward for the fixed web listener.
    pub fn https(balancer_port: u16, instance_port: u16, certificate_id: impl Into<String>) -> Self {
        Listener {
            protocol: Protocol::Https,
            balancer_port,
            instance_protocol: Protocol::Http,
            instance_port,
            ssl_certificate_id: Some(certificate_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Ssl,
    Http,
    Https,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Ssl => "ssl",
            Protocol::Http => "http",
            Protocol::Https => "https",
        };
        f.write_str(s)
    }
}
