//! Per-client token-bucket admission control.
//!
//! Bucket state lives in a [`RateLimitStore`] so limits survive restarts and
//! hold across instances sharing the same store. A store failure never blocks
//! a request: the controller reports [`AdmissionOutcome::FailedOpen`] and lets
//! it through.

mod bucket;
mod config;
mod controller;
mod sqlite;
mod store;

pub use bucket::*;
pub use config::*;
pub use controller::*;
pub use sqlite::*;
pub use store::*;
