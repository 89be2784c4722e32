use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{BalancerApi, BalancerError, Listener};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ConflictBody {
    port: u16,
}

/// [`BalancerApi`] over the edge balancer's admin HTTP API.
///
/// Listeners are a flat resource keyed by external port: `GET` lists them,
/// `POST` binds a batch, `DELETE` unbinds by port. A `409` on bind reports
/// which port was still held.
pub struct HttpBalancer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBalancer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BalancerError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpBalancer { http, base_url })
    }

    fn listeners_url(&self) -> String {
        format!("{}/v1/listeners", self.base_url)
    }
}

#[async_trait]
impl BalancerApi for HttpBalancer {
    async fn describe_listeners(&self) -> Result<Vec<Listener>, BalancerError> {
        let resp = self.http.get(self.listeners_url()).send().await?;
        if !resp.status().is_success() {
            return Err(BalancerError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    async fn add_listeners(&self, listeners: &[Listener]) -> Result<(), BalancerError> {
        if listeners.is_empty() {
            return Ok(());
        }
        let resp = self.http.post(self.listeners_url()).json(listeners).send().await?;
        match resp.status().as_u16() {
            200 | 201 | 204 => Ok(()),
            409 => {
                let port = resp.json::<ConflictBody>().await.map(|b| b.port).unwrap_or(0);
                Err(BalancerError::PortConflict(port))
            }
            status => Err(BalancerError::UnexpectedStatus(status)),
        }
    }

    async fn remove_listeners(&self, ports: &[u16]) -> Result<(), BalancerError> {
        if ports.is_empty() {
            return Ok(());
        }
        let joined =
            ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",");
        let resp = self
            .http
            .delete(self.listeners_url())
            .query(&[("ports", joined)])
            .send()
            .await?;
        match resp.status().as_u16() {
            // Unbinding an unknown port is not a failure.
            200 | 204 | 404 => Ok(()),
            status => Err(BalancerError::UnexpectedStatus(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{any, body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_describe_parses_listener_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/listeners"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "protocol": "tcp",
                    "balancer_port": 8000,
                    "instance_protocol": "tcp",
                    "instance_port": 31001
                }
            ])))
            .mount(&server)
            .await;

        let balancer = HttpBalancer::new(server.uri()).unwrap();
        let listeners = balancer.describe_listeners().await.unwrap();
        assert_eq!(listeners, vec![Listener::tcp(8000, 31001)]);
    }

    #[tokio::test]
    async fn test_add_posts_batch_and_maps_conflict() {
        let server = MockServer::start().await;
        let batch = vec![Listener::tcp(8000, 31001)];
        Mock::given(method("POST"))
            .and(path("/v1/listeners"))
            .and(body_json(&batch))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(json!({ "port": 8000 })),
            )
            .mount(&server)
            .await;

        let balancer = HttpBalancer::new(server.uri()).unwrap();
        let err = balancer.add_listeners(&batch).await.unwrap_err();
        assert!(matches!(err, BalancerError::PortConflict(8000)));
    }

    #[tokio::test]
    async fn test_remove_sends_ports_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/listeners"))
            .and(query_param("ports", "8000,8001"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let balancer = HttpBalancer::new(server.uri()).unwrap();
        balancer.remove_listeners(&[8000, 8001]).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batches_never_reach_the_wire() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let balancer = HttpBalancer::new(server.uri()).unwrap();
        balancer.add_listeners(&[]).await.unwrap();
        balancer.remove_listeners(&[]).await.unwrap();
    }
}
