//! HTTP surface for photozip: zip submission, job status, audit queries and
//! signed artifact downloads.

pub mod api;
pub mod metrics;
pub mod state;
