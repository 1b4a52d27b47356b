//! Testing utilities and mock implementations.
//!
//! Mocks for every external capability a job touches, so the whole
//! pipeline can run in tests without network, buckets or a queue service.
//!
//! # Example
//!
//! ```rust,ignore
//! use photozip_core::testing::{fixtures, MockImageFetcher, MockImageSource};
//!
//! let source = MockImageSource::new();
//! let fetcher = MockImageFetcher::new();
//!
//! let records = fixtures::image_records(3);
//! fetcher.serve_records(&records).await;
//! source.set_results("sunset,beach", records).await;
//! ```

mod mock_image_fetcher;
mod mock_image_source;
mod mock_object_store;
mod mock_rate_limit_store;

pub use mock_image_fetcher::MockImageFetcher;
pub use mock_image_source::MockImageSource;
pub use mock_object_store::MockObjectStore;
pub use mock_rate_limit_store::MockRateLimitStore;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::source::ImageRecord;

    /// Create one image record with a predictable URL.
    pub fn image_record(index: usize, title: &str) -> ImageRecord {
        ImageRecord {
            source_url: format!("https://live.staticflickr.com/mock/{}_b.jpg", index + 1),
            title: title.to_string(),
            index,
        }
    }

    /// Create `count` records titled "Photo 1", "Photo 2", ...
    pub fn image_records(count: usize) -> Vec<ImageRecord> {
        (0..count)
            .map(|i| image_record(i, &format!("Photo {}", i + 1)))
            .collect()
    }

    /// Bytes served for `record` by [`MockImageFetcher::serve_records`](super::MockImageFetcher::serve_records).
    pub fn image_bytes(record: &ImageRecord) -> Vec<u8> {
        format!("JPEG bytes of {} ({})", record.title, record.source_url).into_bytes()
    }
}
