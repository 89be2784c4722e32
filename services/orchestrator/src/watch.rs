//! Deadline-bounded watch-to-resolution loops.
//!
//! One long-poll loop shape drives both resolution watches: poll the
//! watched resource with the last-seen change index, pick the
//! authoritative observation out of the response, and stop at the first
//! terminal observation or at the deadline, whichever comes first. The
//! deadline is a hard stop: the loop never blocks past it, and at the
//! deadline it returns whatever it last saw, possibly nothing.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::discovery::{CheckStatus, DiscoveryApi, HealthCheck};
use crate::scheduler::{Allocation, ClientStatus, SchedulerApi};

/// Breather after a failed poll so a dead endpoint cannot spin the loop.
const POLL_FAILURE_DELAY: Duration = Duration::from_millis(500);

/// One long-poll response: the observations it carried and the change
/// index to resume from.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    pub items: Vec<T>,
    pub index: u64,
}

impl<T> Chunk<T> {
    /// What a failed or unparseable poll degrades to: nothing observed,
    /// resume from the same index.
    pub fn empty(index: u64) -> Self {
        Chunk { items: Vec::new(), index }
    }
}

/// Server-side hold for the next poll: the whole remaining budget, rounded
/// up to whole seconds. Recomputed every cycle so the final poll is held
/// no longer than the deadline allows.
fn wait_budget(deadline: Instant) -> Duration {
    let remaining = deadline.saturating_duration_since(Instant::now());
    Duration::from_secs(remaining.as_millis().div_ceil(1000) as u64)
}

/// Long-poll `poll` until `terminal` holds for the selected observation or
/// `deadline` passes.
///
/// `select` reduces one response to its authoritative observation. The
/// loop keeps the most recent selection so a deadline hit still returns
/// the best information available. Poll failures are logged and treated as
/// an empty response; a watch never dies from one bad poll.
pub async fn watch_to_resolution<T, E, Fut>(
    mut poll: impl FnMut(u64, Duration) -> Fut,
    mut select: impl FnMut(Vec<T>) -> Option<T>,
    terminal: impl Fn(&T) -> bool,
    deadline: Instant,
) -> Option<T>
where
    E: Display,
    Fut: Future<Output = Result<Chunk<T>, E>>,
{
    let mut last: Option<T> = None;
    let mut index = 0u64;
    loop {
        if Instant::now() >= deadline {
            return last;
        }
        tokio::select! {
            res = poll(index, wait_budget(deadline)) => match res {
                Ok(chunk) => {
                    // Indexes only move forward; a reset source must not
                    // replay history at us.
                    index = index.max(chunk.index);
                    if let Some(observed) = select(chunk.items) {
                        if terminal(&observed) {
                            return Some(observed);
                        }
                        last = Some(observed);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "watch poll failed, continuing");
                    tokio::time::sleep_until((Instant::now() + POLL_FAILURE_DELAY).min(deadline))
                        .await;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                return last;
            }
        }
    }
}

/// Authoritative allocation among concurrently returned candidates: the
/// highest job version wins, first-seen wins ties. A redeployed job
/// supersedes the allocations of older versions.
pub fn authoritative_allocation(candidates: Vec<Allocation>) -> Option<Allocation> {
    let mut best: Option<Allocation> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.version <= current.version => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Watch a job's allocations until one is `running` or the deadline hits.
pub async fn watch_allocation_to_resolution(
    scheduler: &dyn SchedulerApi,
    job_name: &str,
    deadline: Instant,
) -> Option<Allocation> {
    watch_to_resolution(
        |index, wait| scheduler.poll_allocations(job_name, index, wait),
        authoritative_allocation,
        |alloc| alloc.client_status == ClientStatus::Running,
        deadline,
    )
    .await
}

/// Watch one service's health checks until they are `passing` or the
/// deadline hits. At most one check record is expected per service.
pub async fn watch_service_to_resolution(
    discovery: &dyn DiscoveryApi,
    service: &str,
    deadline: Instant,
) -> Option<HealthCheck> {
    watch_to_resolution(
        |index, wait| discovery.poll_checks(service, index, wait),
        |checks| checks.into_iter().next(),
        |check| check.status == CheckStatus::Passing,
        deadline,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::scheduler::ClientStatus;

    fn alloc(version: u64, status: ClientStatus) -> Allocation {
        Allocation {
            id: format!("alloc-{version}"),
            client_status: status,
            version,
            task_states: Default::default(),
        }
    }

    #[test]
    fn test_highest_version_wins_selection() {
        let picked = authoritative_allocation(vec![
            alloc(3, ClientStatus::Pending),
            alloc(7, ClientStatus::Running),
            alloc(5, ClientStatus::Pending),
        ])
        .unwrap();
        assert_eq!(picked.version, 7);
    }

    #[test]
    fn test_version_ties_break_first_seen() {
        let mut first = alloc(4, ClientStatus::Pending);
        first.id = "first".into();
        let mut second = alloc(4, ClientStatus::Pending);
        second.id = "second".into();

        let picked = authoritative_allocation(vec![first, second]).unwrap();
        assert_eq!(picked.id, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_observation_ends_the_watch() {
        let polls = AtomicU64::new(0);
        let deadline = Instant::now() + Duration::from_secs(30);

        let got = watch_to_resolution(
            |index, _wait| {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let status =
                        if n == 0 { ClientStatus::Pending } else { ClientStatus::Running };
                    Ok::<_, Infallible>(Chunk { items: vec![alloc(n + 1, status)], index: index + 1 })
                }
            },
            authoritative_allocation,
            |a| a.client_status == ClientStatus::Running,
            deadline,
        )
        .await;

        assert_eq!(got.unwrap().client_status, ClientStatus::Running);
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_last_seen_observation() {
        let deadline = Instant::now() + Duration::from_secs(5);

        let got = watch_to_resolution(
            |index, _wait| async move {
                // The source answers but never reaches terminal.
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok::<_, Infallible>(Chunk {
                    items: vec![alloc(1, ClientStatus::Pending)],
                    index: index + 1,
                })
            },
            authoritative_allocation,
            |a| a.client_status == ClientStatus::Running,
            deadline,
        )
        .await;

        assert!(Instant::now() >= deadline);
        assert_eq!(got.unwrap().client_status, ClientStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_source_returns_none_at_deadline() {
        let deadline = Instant::now() + Duration::from_secs(5);

        let got = watch_to_resolution(
            |_index, _wait| async move {
                std::future::pending::<Result<Chunk<Allocation>, Infallible>>().await
            },
            authoritative_allocation,
            |a| a.client_status == ClientStatus::Running,
            deadline,
        )
        .await;

        assert!(got.is_none());
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_do_not_kill_the_watch() {
        let polls = AtomicU64::new(0);
        let deadline = Instant::now() + Duration::from_secs(30);

        let got = watch_to_resolution(
            |index, _wait| {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err("connection refused".to_string())
                    } else {
                        Ok(Chunk { items: vec![alloc(1, ClientStatus::Running)], index: index + 1 })
                    }
                }
            },
            authoritative_allocation,
            |a| a.client_status == ClientStatus::Running,
            deadline,
        )
        .await;

        assert_eq!(got.unwrap().client_status, ClientStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_budget_rounds_up_and_never_goes_negative() {
        let deadline = Instant::now() + Duration::from_millis(1500);
        assert_eq!(wait_budget(deadline), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(wait_budget(deadline), Duration::ZERO);
    }
}
