//! Streaming zip construction.
//!
//! Entries are downloaded one after another and fed to a blocking zip
//! compressor through bounded channels; the compressed output is exposed as
//! an async byte stream. Neither the inputs nor the archive are ever held in
//! memory whole.

mod builder;
mod naming;
mod types;

pub use builder::*;
pub use naming::*;
pub use types::*;
