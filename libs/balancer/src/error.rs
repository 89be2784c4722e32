use thiserror::Error;

/// Errors produced by balancer admin adapters.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// The balancer admin API could not be reached.
    #[error("balancer transport error: {0}")]
    Transport(String),

    /// The admin API answered with a status the adapter does not accept.
    #[error("unexpected balancer status {0}")]
    UnexpectedStatus(u16),

    /// An add collided with a port that is still bound.
    #[error("listener port {0} already bound")]
    PortConflict(u16),
}

impl From<reqwest::Error> for BalancerError {
    fn from(e: reqwest::Error) -> Self {
        BalancerError::Transport(e.to_string())
    }
}
