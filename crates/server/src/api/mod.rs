pub mod artifacts;
pub mod audit;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod zip;

pub use routes::create_router;
