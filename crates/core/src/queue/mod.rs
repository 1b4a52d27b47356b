//! Job request queue: clients, message format and the dispatch loop.

mod config;
mod dispatcher;
mod memory;
mod message;
mod pubsub;
mod types;

pub use config::*;
pub use dispatcher::MessageDispatcher;
pub use memory::MemoryQueue;
pub use message::*;
pub use pubsub::PubSubClient;
pub use types::*;
