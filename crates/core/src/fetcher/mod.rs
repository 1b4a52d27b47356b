//! Per-entry image downloads as byte streams.

mod config;
mod http;
mod types;

pub use config::*;
pub use http::HttpImageFetcher;
pub use types::*;
