//! # tandem-store
//!
//! Versioned record access on top of the cluster's coordination store.
//! Every read returns the record together with the version the store
//! reported for it, and every write is a compare-and-set against a version
//! captured earlier. Writers that lose a race observe `false` and re-read
//! instead of clobbering each other.
//!
//! ## Design principles
//!
//! - **No unversioned writes.** The only mutators are `compare_and_put`
//!   and `delete`; plain overwrites do not exist in the API.
//! - **Absence is a version.** A missing key reads as an absent record at
//!   version 0, and a CAS at version 0 succeeds only if the key still does
//!   not exist.
//! - **Blocking reads over polling.** `await_change` holds the request at
//!   the store until the watched prefix moves past a known index, so change
//!   notification costs one idle HTTP request instead of a poll loop.

mod error;
mod http;
mod memory;
mod notify;
mod record;

pub use error::*;
pub use http::*;
pub use memory::*;
pub use notify::*;
pub use record::*;
