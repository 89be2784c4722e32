use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::RecordStore;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Spawn a task that long-polls `prefix` and pushes a unit wakeup into `tx`
/// every time the prefix's index advances. One wakeup is pushed up front so
/// the consumer runs an initial pass without waiting for a change.
///
/// Wakeups coalesce: when the consumer is behind, extra notifications are
/// dropped instead of queued. One pass over current state absorbs any
/// number of changes, so a backlog carries no information.
pub fn spawn_prefix_watch(
    store: Arc<dyn RecordStore>,
    prefix: String,
    wait: Duration,
    tx: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen = 0u64;
        if notify(&tx).is_break() {
            return;
        }
        loop {
            tokio::select! {
                res = store.await_change(&prefix, seen, wait) => match res {
                    Ok(index) => {
                        if index > seen {
                            debug!(prefix = %prefix, index, "prefix moved");
                            seen = index;
                            if notify(&tx).is_break() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(prefix = %prefix, error = %e, "prefix watch failed, retrying");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(prefix = %prefix, "prefix watch stopping");
                        return;
                    }
                }
            }
        }
    })
}

fn notify(tx: &mpsc::Sender<()>) -> std::ops::ControlFlow<()> {
    match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => std::ops::ControlFlow::Continue(()),
        Err(TrySendError::Closed(())) => std::ops::ControlFlow::Break(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::MemoryStore;

    #[tokio::test]
    async fn test_prefix_watch_fires_initially_and_on_change() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle =
            spawn_prefix_watch(store.clone(), "p".into(), Duration::from_secs(1), tx, stop_rx);

        rx.recv().await.expect("initial wakeup");
        store.compare_and_put("p/x", serde_json::json!(1), 0).await.unwrap();
        rx.recv().await.expect("wakeup after write");

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_prefix_watch_exits_when_consumer_hangs_up() {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let handle =
            spawn_prefix_watch(store.clone(), "p".into(), Duration::from_millis(50), tx, stop_rx);

        drop(rx);
        store.compare_and_put("p/x", serde_json::json!(1), 0).await.unwrap();
        handle.await.unwrap();
    }
}
