use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Compressor task failed: {0}")]
    Compressor(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Zip(e.to_string())
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// One entry to place in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntrySpec {
    /// Name inside the archive
    pub name: String,
    pub source_url: String,
}

/// An entry that did not make it into the archive intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
    /// The download failed after the entry outgrew the buffer and was
    /// already being streamed, so a partial entry is present in the archive.
    pub truncated: bool,
}

/// What happened to the scheduled entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub scheduled: usize,
    pub embedded: usize,
    pub skipped: Vec<SkippedEntry>,
    /// Uncompressed bytes received from the fetcher.
    pub input_bytes: u64,
    /// Set when the consumer went away before every entry was attempted.
    pub aborted: bool,
}

/// Tuning knobs for the pipeline buffers.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveOptions {
    /// Compressed bytes accumulated before a chunk is emitted.
    pub chunk_size: usize,
    /// Capacity, in messages, of each channel between pipeline stages.
    pub channel_capacity: usize,
    /// Bytes of one entry held back until its download completes.
    pub buffer_limit: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            channel_capacity: 8,
            buffer_limit: 16 * 1024 * 1024,
        }
    }
}
