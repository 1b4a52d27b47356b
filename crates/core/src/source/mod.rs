//! Image source abstraction.
//!
//! An [`ImageSource`] turns a tag query into an ordered list of candidate
//! images. [`fetch_capped`] applies the per-job cap.

mod config;
mod flickr;
mod types;

pub use config::*;
pub use flickr::FlickrFeedSource;
pub use types::*;
