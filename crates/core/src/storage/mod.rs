//! Durable archive storage.
//!
//! [`ObjectStore`] is the write-bytes/get-a-link capability; [`ArtifactPublisher`]
//! allocates unique paths, streams archives into a store and records what
//! was published.

mod config;
mod fs;
mod publisher;
mod signer;
mod types;

pub use config::*;
pub use fs::FsObjectStore;
pub use publisher::*;
pub use signer::UrlSigner;
pub use types::*;
