//! # tandem-balancer
//!
//! Listener management for the edge balancer that fronts paired sessions.
//! The coordinator computes the listener set a balancer *should* carry from
//! live pairings, diffs it against what the balancer *does* carry, and
//! applies the difference.
//!
//! ## Design principles
//!
//! - **Diff, never rewrite.** The balancer is converged by applying the
//!   minimal add/remove set, so untouched sessions never flap.
//! - **Removals land first.** A changed listener reuses its external port;
//!   the old binding must be gone before the new one is created.
//! - **Ports identify removals.** The balancer keys listeners by external
//!   port, so a removal is just the port number.

mod api;
mod diff;
mod error;
mod http;
mod listener;
mod memory;

pub use api::*;
pub use diff::*;
pub use error::*;
pub use http::*;
pub use listener::*;
pub use memory::*;
