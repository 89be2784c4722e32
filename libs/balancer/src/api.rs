use async_trait::async_trait;
use tracing::info;

use crate::{diff_listeners, BalancerError, Listener, ListenerChanges};

/// Admin surface of the edge balancer.
///
/// Implementations must treat `add_listeners` on a bound port as an error
/// rather than an overwrite. [`apply_changes`] relies on that to catch
/// ordering bugs instead of silently rebinding ports.
#[async_trait]
pub trait BalancerApi: Send + Sync {
    async fn describe_listeners(&self) -> Result<Vec<Listener>, BalancerError>;
    async fn add_listeners(&self, listeners: &[Listener]) -> Result<(), BalancerError>;
    async fn remove_listeners(&self, ports: &[u16]) -> Result<(), BalancerError>;
}

/// Apply a computed diff, removals strictly before additions. A rebound
/// port appears on both sides of the diff and must be freed first.
pub async fn apply_changes(
    api: &dyn BalancerApi,
    changes: &ListenerChanges,
) -> Result<(), BalancerError> {
    if !changes.to_remove.is_empty() {
        api.remove_listeners(&changes.to_remove).await?;
    }
    if !changes.to_add.is_empty() {
        api.add_listeners(&changes.to_add).await?;
    }
    Ok(())
}

/// Converge the balancer onto `expected`: read the live listener set, diff,
/// apply. Returns the changes that were applied so callers can log or count
/// them.
pub async fn reconcile(
    api: &dyn BalancerApi,
    expected: &[Listener],
) -> Result<ListenerChanges, BalancerError> {
    let actual = api.describe_listeners().await?;
    let changes = diff_listeners(expected, &actual);
    if !changes.is_empty() {
        info!(
            removed = changes.to_remove.len(),
            added = changes.to_add.len(),
            "converging balancer listeners"
        );
        apply_changes(api, &changes).await?;
    }
    Ok(changes)
}
