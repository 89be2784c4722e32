use thiserror::Error;

/// Errors produced by record store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the request failed in transit.
    #[error("store transport error: {0}")]
    Transport(String),

    /// The store answered with a status the adapter does not accept.
    #[error("unexpected store status {status} for key {key}")]
    UnexpectedStatus { status: u16, key: String },

    /// The store answered 200 but the body did not parse as a record set.
    #[error("malformed store response for key {key}: {reason}")]
    MalformedResponse { key: String, reason: String },
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Transport(format!("record encode failed: {e}"))
    }
}
