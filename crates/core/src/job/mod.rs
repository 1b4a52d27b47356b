//! One job: tag query in, published archive and recorded outcome out.

mod config;
mod orchestrator;
mod types;

pub use config::*;
pub use orchestrator::*;
pub use types::*;
