//! Failure classification for attempts that did not reach healthy.
//!
//! A classification is data, never an error: the saga maps it onto a
//! decision, and every call site matches the enum exhaustively. The
//! default is `Permanent` on purpose. A wrong `Restart` loops a doomed
//! request through the queue forever and a wrong `Pending` stalls it
//! indefinitely; a wrong `Permanent` fails one request, loudly.

use crate::discovery::HealthCheck;
use crate::scheduler::Allocation;

/// How a failed attempt affects its request's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Unrecoverable: evict the request from the system.
    Permanent,
    /// Transient contention: leave the request untouched, the next natural
    /// trigger retries.
    Pending,
    /// The allocation was lost: requeue the request as waiting.
    Restart,
}

/// Classify an allocation that was not `running` at its deadline.
///
/// `observed` is the authoritative allocation the watch last saw, absent
/// when the scheduler never produced one. Today every outcome is
/// `Permanent`; distinguishing lost allocations (`Restart`) and placement
/// contention (`Pending`) is the extension point this signature exists
/// for.
pub fn classify_allocation(observed: Option<&Allocation>) -> Disposition {
    let _ = observed;
    Disposition::Permanent
}

/// Classify a failed health barrier.
///
/// `observed` holds, per watched service, the check the watch last saw.
/// As with allocations, the current policy is the safe default only.
pub fn classify_services(observed: &[Option<HealthCheck>]) -> Disposition {
    let _ = observed;
    Disposition::Permanent
}
