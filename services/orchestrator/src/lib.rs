//! tandem orchestrator
//!
//! The coordination loop that turns user requests into running hmi/core
//! pairings. Requests arrive in the store, wait their turn in a fair queue,
//! get a two-task job submitted to the cluster scheduler, and are promoted
//! to `running` once every declared service reports healthy and resolves to
//! a concrete address. Live pairings are projected onto the edge balancer's
//! listener set.
//!
//! ## Architecture
//!
//! - **Dispatcher**: top-level loop; wakes on store change notifications,
//!   syncs the waiting queue, runs one pairing saga at a time, applies its
//!   decision through CAS writes
//! - **Saga**: per-request orchestration (job CAS submit, allocation watch,
//!   health barrier, address resolution) returning an immutable decision
//! - **Watchers**: deadline-bounded long-poll loops over scheduler
//!   allocations and service health
//! - **Registry**: per-pairing service watches that fill in allocation
//!   records as halves come alive
//! - **Pairing**: joins allocation records with live requests and converges
//!   the balancer's listeners onto the result
//!
//! Every store write is a compare-and-set; a lost race is abandoned
//! silently and re-driven by the next change notification. Multiple
//! orchestrator replicas can therefore run against one store.

pub mod classifier;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod job;
pub mod keys;
pub mod pairing;
pub mod provision;
pub mod queue;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod saga;
pub mod scheduler;
pub mod watch;

#[cfg(test)]
mod fakes;
