use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::{CasRecord, KvEntry, PrefixSnapshot, RecordStore, StoreError};

/// Response header carrying the prefix index for blocking reads.
pub const INDEX_HEADER: &str = "X-Store-Index";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack on top of the server-side wait so the store, not the client,
/// decides when a blocking read comes back empty.
const LONG_POLL_MARGIN: Duration = Duration::from_secs(5);

/// KV record as the store's HTTP API ships it. Values travel base64-encoded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEntry {
    key: String,
    value: Option<String>,
    modify_index: u64,
}

fn to_entry(raw: RawEntry) -> KvEntry {
    let bytes = match &raw.value {
        Some(b64) => BASE64.decode(b64).unwrap_or_default(),
        None => Vec::new(),
    };
    let value: Option<serde_json::Value> = serde_json::from_slice(&bytes).ok();
    if value.is_none() {
        debug!(key = %raw.key, "store value did not decode as json, reading as absent");
    }
    KvEntry {
        key: raw.key,
        record: CasRecord { value, version: raw.modify_index },
    }
}

/// [`RecordStore`] over the coordination store's HTTP KV API.
///
/// Reads carry versions out of `ModifyIndex`, writes go through the `cas`
/// query parameter, and `await_change` maps onto the store's blocking-read
/// protocol (`index` + `wait` query parameters, next index in the
/// [`INDEX_HEADER`] response header).
pub struct HttpKvStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpKvStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(HttpKvStore { http, base_url })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key)
    }
}

fn index_header(resp: &reqwest::Response) -> Option<u64> {
    resp.headers().get(INDEX_HEADER)?.to_str().ok()?.parse().ok()
}

#[async_trait::async_trait]
impl RecordStore for HttpKvStore {
    async fn load(&self, key: &str) -> Result<CasRecord, StoreError> {
        let resp = self.http.get(self.kv_url(key)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(CasRecord::absent()),
            StatusCode::OK => {
                let raws: Vec<RawEntry> =
                    resp.json().await.map_err(|e| StoreError::MalformedResponse {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(raws
                    .into_iter()
                    .next()
                    .map(|raw| to_entry(raw).record)
                    .unwrap_or_else(CasRecord::absent))
            }
            status => Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<PrefixSnapshot, StoreError> {
        let resp = self
            .http
            .get(self.kv_url(prefix))
            .query(&[("recurse", "true")])
            .send()
            .await?;
        let index = index_header(&resp).unwrap_or(0);
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(PrefixSnapshot { entries: Vec::new(), index }),
            StatusCode::OK => {
                let raws: Vec<RawEntry> =
                    resp.json().await.map_err(|e| StoreError::MalformedResponse {
                        key: prefix.to_string(),
                        reason: e.to_string(),
                    })?;
                let entries = raws.into_iter().map(to_entry).collect();
                Ok(PrefixSnapshot { entries, index })
            }
            status => Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: prefix.to_string(),
            }),
        }
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: serde_json::Value,
        version: u64,
    ) -> Result<bool, StoreError> {
        let body = serde_json::to_vec(&value)?;
        let resp = self
            .http
            .put(self.kv_url(key))
            .query(&[("cas", version)])
            .body(body)
            .send()
            .await?;
        if resp.status() != StatusCode::OK {
            return Err(StoreError::UnexpectedStatus {
                status: resp.status().as_u16(),
                key: key.to_string(),
            });
        }
        // The store answers the CAS verdict as a bare boolean body.
        let text = resp.text().await?;
        Ok(text.trim() == "true")
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let resp = self.http.delete(self.kv_url(key)).send().await?;
        match resp.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }

    async fn await_change(
        &self,
        prefix: &str,
        seen_index: u64,
        wait: Duration,
    ) -> Result<u64, StoreError> {
        let wait_secs = wait.as_secs().max(1);
        let resp = self
            .http
            .get(self.kv_url(prefix))
            .query(&[
                ("recurse", "true".to_string()),
                ("index", seen_index.to_string()),
                ("wait", format!("{wait_secs}s")),
            ])
            .timeout(wait + LONG_POLL_MARGIN)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => {
                // Clamp so a store-side index reset never walks us backwards.
                Ok(index_header(&resp).unwrap_or(seen_index).max(seen_index))
            }
            status => Err(StoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: prefix.to_string(),
            }),
        }
    }
}
